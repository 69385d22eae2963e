//! Optional socket agent holding one opaque blob.
//!
//! When the agent is reachable it stores the third share. When it is not, the
//! engine splits into two shares instead; nothing here is ever fatal.
//!
//! Wire format, one command per connection:
//!
//! ```text
//! GET\n            -> [D <escaped blob>\n] OK\n
//! PUT <escaped>\n  -> OK\n
//! anything else    -> ERR <code> <message>\n
//! ```

pub mod server;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::agent::assuan::{self, Reply};
use crate::config::SocketConfig;
use crate::error::SocketError;

#[async_trait]
pub trait SocketBackend: Send + Sync {
    /// Whether the agent is reachable right now.
    async fn probe(&self) -> bool;

    /// The stored blob, or `None` if the slot is empty.
    async fn get(&self) -> Result<Option<Vec<u8>>, SocketError>;

    /// Replace the stored blob.
    async fn put(&self, blob: &[u8]) -> Result<(), SocketError>;
}

/// Client for the socket agent daemon in [`server`].
#[derive(Debug, Clone)]
pub struct UnixSocketAgent {
    path: PathBuf,
    timeout: Duration,
}

impl UnixSocketAgent {
    pub fn new(config: &SocketConfig) -> Self {
        Self {
            path: config.path.clone(),
            timeout: config.timeout,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn connect(&self) -> Result<UnixStream, SocketError> {
        timeout(self.timeout, UnixStream::connect(&self.path))
            .await
            .map_err(|_| SocketError::Timeout)?
            .map_err(SocketError::from)
    }

    async fn request(&self, line: &str) -> Result<Reply, SocketError> {
        let mut stream = self.connect().await?;

        let exchange = async {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.shutdown().await?;
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, std::io::Error>(response)
        };
        let response = timeout(self.timeout, exchange)
            .await
            .map_err(|_| SocketError::Timeout)??;

        let text = String::from_utf8_lossy(&response);
        assuan::parse_replies(&text)
            .into_iter()
            .next()
            .ok_or_else(|| SocketError::Protocol("empty response".to_string()))
    }
}

#[async_trait]
impl SocketBackend for UnixSocketAgent {
    async fn probe(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        self.connect().await.is_ok()
    }

    async fn get(&self) -> Result<Option<Vec<u8>>, SocketError> {
        match self.request("GET").await? {
            Reply::Ok(data) if data.is_empty() => Ok(None),
            Reply::Ok(data) => Ok(Some(data)),
            Reply::Err { code, message } => {
                Err(SocketError::Protocol(format!("GET failed ({}: {})", code, message)))
            }
        }
    }

    async fn put(&self, blob: &[u8]) -> Result<(), SocketError> {
        let line = format!("PUT {}", assuan::escape(blob));
        match self.request(&line).await? {
            Reply::Ok(_) => Ok(()),
            Reply::Err { code, message } => {
                Err(SocketError::Protocol(format!("PUT failed ({}: {})", code, message)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn missing_socket_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let client = UnixSocketAgent::new(&Config::for_dir(dir.path()).socket);
        assert!(!client.probe().await);
        assert!(matches!(client.get().await, Err(SocketError::Unavailable(_))));
    }

    #[tokio::test]
    async fn round_trips_through_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_dir(dir.path());
        let server = server::SocketAgentServer::bind(&config.socket.path).unwrap();
        let handle = tokio::spawn(server.run());

        let client = UnixSocketAgent::new(&config.socket);
        assert!(client.probe().await);
        assert_eq!(client.get().await.unwrap(), None);

        client.put(b"3a4f00ff").await.unwrap();
        assert_eq!(client.get().await.unwrap().as_deref(), Some(&b"3a4f00ff"[..]));

        client.put(b"second blob with spaces\n").await.unwrap();
        assert_eq!(
            client.get().await.unwrap().as_deref(),
            Some(&b"second blob with spaces\n"[..])
        );

        handle.abort();
    }
}
