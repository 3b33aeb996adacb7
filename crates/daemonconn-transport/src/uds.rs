use std::net::Shutdown;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use daemonconn_protocol::{CodecConfig, JsonLinesReader, JsonLinesWriter, Message};
use tracing::{debug, info};

use crate::channel::RawChannel;
use crate::error::{Result, TransportError};

/// A connected Unix domain socket carrying one JSON message per line.
///
/// Reads and writes take separate locks, so one thread can block in
/// [`receive`](RawChannel::receive) while others dispatch.
pub struct UnixChannel {
    reader: Mutex<JsonLinesReader<UnixStream>>,
    writer: Mutex<JsonLinesWriter<UnixStream>>,
    control: UnixStream,
    closed: AtomicBool,
}

impl UnixChannel {
    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream, config: CodecConfig) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let control = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(JsonLinesReader::with_config(reader_stream, config.clone())),
            writer: Mutex::new(JsonLinesWriter::with_config(stream, config)),
            control,
            closed: AtomicBool::new(false),
        })
    }

    /// Connect to a listening daemon socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_config(path, CodecConfig::default())
    }

    /// Connect with an explicit codec configuration.
    pub fn connect_with_config(path: impl AsRef<Path>, config: CodecConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Self::from_stream(stream, config)
    }

    /// Create a connected pair of channels.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((
            Self::from_stream(left, CodecConfig::default())?,
            Self::from_stream(right, CodecConfig::default())?,
        ))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RawChannel for UnixChannel {
    fn receive(&self) -> Result<Option<Message>> {
        if self.is_closed() {
            return Ok(None);
        }
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        match reader.read_message() {
            Ok(message) => Ok(message),
            // A local close can surface as a read error on some platforms.
            Err(_) if self.is_closed() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn dispatch(&self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send(&message)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.control.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }
}

impl std::fmt::Debug for UnixChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixChannel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Listens for client connections on a filesystem-path Unix domain socket.
///
/// The socket file is removed on drop, unless something else replaced it.
pub struct UnixChannelListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
    config: CodecConfig,
}

impl UnixChannelListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 elsewhere.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen, removing a stale socket at `path` if there is one.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit socket file mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        remove_stale_socket(&path)?;

        let bind_error = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };
        let listener = UnixListener::bind(&path).map_err(bind_error)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_error)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_error)?;

        info!(?path, "listening for daemon clients");

        Ok(Self {
            listener,
            created_inode: (metadata.dev(), metadata.ino()),
            path,
            config: CodecConfig::default(),
        })
    }

    /// Override the codec configuration used for accepted channels.
    pub fn with_codec_config(mut self, config: CodecConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next client (blocking).
    pub fn accept(&self) -> Result<UnixChannel> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted client connection");
        UnixChannel::from_stream(stream, self.config.clone())
    }

    /// The path this listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Remove an existing socket file, but never anything that isn't a socket.
fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(TransportError::Bind {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !metadata.file_type().is_socket() {
        return Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        });
    }

    debug!(?path, "removing stale socket");
    std::fs::remove_file(path).map_err(|source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    })
}

impl Drop for UnixChannelListener {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        let (dev, ino) = self.created_inode;
        if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
        }
    }
}
