#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/dccli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// The socket file appears once the server is accepting; probing with a
/// connection would count against `--count`.
fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_server(sock_path: &Path, count: usize) -> Child {
    let child = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .args(["--log-level", "error", "--format", "json", "serve"])
        .arg(sock_path)
        .args(["--count", &count.to_string(), "--receive-timeout", "100ms"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");
    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

fn finish_server(mut child: Child) -> Output {
    let start = Instant::now();
    loop {
        if child.try_wait().expect("server status").is_some() {
            return child.wait_with_output().expect("server output");
        }
        if start.elapsed() >= Duration::from_secs(5) {
            let _ = child.kill();
            let output = child.wait_with_output().expect("server output");
            panic!(
                "server did not exit; stderr: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn build_request_gets_full_reply_sequence() {
    let dir = unique_temp_dir("build");
    let sock_path = dir.join("daemon.sock");
    let server = spawn_server(&sock_path, 1);

    let output = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .arg(&sock_path)
        .args(["--build", r#"{"tasks":["check"]}"#, "--wait"])
        .output()
        .expect("send should run");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let kinds: Vec<String> = stdout
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            value["kind"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(kinds, vec!["build_started", "log_event", "build_event", "result"]);
    assert!(stdout.contains("check"));

    let server = finish_server(server);
    assert!(server.status.success());
    let served = String::from_utf8_lossy(&server.stdout);
    assert!(served.contains(r#""kind":"protocol""#));
    assert!(served.contains(r#""stream":"disconnect""#));
    assert!(!sock_path.exists(), "socket file should be removed on exit");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stdin_and_cancel_reach_their_streams() {
    let dir = unique_temp_dir("stdin");
    let sock_path = dir.join("daemon.sock");
    let server = spawn_server(&sock_path, 1);

    let mut client = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .arg(&sock_path)
        .args(["--stdin", "--cancel", "--build", "{}", "--wait"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .expect("send should start");
    client
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(b"hello daemon")
        .expect("write stdin");
    assert!(client.wait().expect("send status").success());

    let server = finish_server(server);
    let served = String::from_utf8_lossy(&server.stdout);
    assert!(served.contains(r#""detail":"hello daemon""#), "{served}");
    assert!(served.contains(r#""kind":"end_of_input""#), "{served}");
    assert!(served.contains(r#""stream":"cancel""#), "{served}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_request_is_refused() {
    let dir = unique_temp_dir("refuse");
    let sock_path = dir.join("daemon.sock");
    let server = spawn_server(&sock_path, 1);

    let output = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .arg(&sock_path)
        .args(["--json", r#"{"type":"protocol","kind":"shutdown"}"#, "--wait"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("daemon_unavailable"));

    assert!(finish_server(server).status.success());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn interrupt_stops_an_idle_server() {
    let dir = unique_temp_dir("interrupt");
    let sock_path = dir.join("daemon.sock");
    let server = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .args(["--log-level", "error", "serve"])
        .arg(&sock_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");
    wait_for_socket(&sock_path, Duration::from_secs(3));

    let status = Command::new("kill")
        .args(["-INT", &server.id().to_string()])
        .status()
        .expect("kill should run");
    assert!(status.success());

    let output = finish_server(server);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(!sock_path.exists(), "socket file should be removed on exit");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_socket_returns_3() {
    let dir = unique_temp_dir("missing");
    let output = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .arg("send")
        .arg(dir.join("nobody.sock"))
        .args(["--json", r#"{"type":"cancel_signal"}"#])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_message_returns_64() {
    let output = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .args(["send", "/tmp/irrelevant.sock", "--json", "not json"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_daemonconn"))
        .args(["version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("daemonconn {}", env!("CARGO_PKG_VERSION"))));
    assert!(stdout.contains("build_target: "));
}
