//! Parent/child rendezvous over a Unix socket.
//!
//! The supervisor binds one socket per spawned process and hands its path to the
//! child in [`IPC_SOCKET_ENV`]; the child connects back with [`connect_from_env`].
//! Standard output and error stay free for plain output events.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

use super::channel::ChannelTransport;
use crate::error::TransportError;
use crate::token::correlation_token;

/// Environment variable carrying the socket path into the child.
pub const IPC_SOCKET_ENV: &str = "APIARY_IPC_SOCKET";

const LABEL_MAX: usize = 32;

/// Listening end owned by the parent. Removes its socket file on drop.
#[derive(Debug)]
pub struct IpcListener {
    path: PathBuf,
    listener: UnixListener,
}

impl IpcListener {
    /// Binds `<dir>/<label>-<token>.sock`, creating `dir` if needed.
    pub fn bind(dir: &Path, label: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}-{}.sock", sanitize(label), correlation_token()));
        let listener = UnixListener::bind(&path)?;
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the child to connect.
    pub async fn accept(&self) -> io::Result<ChannelTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(ChannelTransport::from_unix(stream))
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connects to the socket at `path`.
pub async fn connect(path: impl AsRef<Path>) -> io::Result<ChannelTransport> {
    let stream = UnixStream::connect(path).await?;
    Ok(ChannelTransport::from_unix(stream))
}

/// Connects to the socket announced by the parent in [`IPC_SOCKET_ENV`].
pub async fn connect_from_env() -> Result<ChannelTransport, TransportError> {
    let path = std::env::var_os(IPC_SOCKET_ENV).ok_or(TransportError::NotConfigured {
        var: IPC_SOCKET_ENV,
    })?;
    Ok(connect(PathBuf::from(path)).await?)
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(LABEL_MAX)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Message;

    #[tokio::test]
    async fn listener_accepts_one_child_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let listener = IpcListener::bind(dir.path(), "web/1 two").unwrap();
        let path = listener.path().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("web_1_two-"));

        let client = tokio::spawn({
            let path = path.clone();
            async move { connect(&path).await.unwrap() }
        });
        let mut server = listener.accept().await.unwrap();
        let mut client = client.await.unwrap();

        client
            .send(&Message::Declare { functions: vec![] })
            .await
            .unwrap();
        assert!(matches!(
            server.recv().await.unwrap().unwrap(),
            Message::Declare { .. }
        ));

        drop(listener);
        assert!(!path.exists());
    }

    #[test]
    fn label_is_truncated() {
        assert_eq!(sanitize(&"x".repeat(100)).len(), LABEL_MAX);
    }
}
