use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("daemonconn {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "build_target: {}",
        option_env!("DAEMONCONN_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("DAEMONCONN_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "unix_sockets: {}",
        if cfg!(unix) { "supported" } else { "unsupported" }
    );
    println!(
        "max_message_size: {}",
        daemonconn::protocol::DEFAULT_MAX_MESSAGE_SIZE
    );

    Ok(SUCCESS)
}
