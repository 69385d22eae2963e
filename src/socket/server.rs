//! The socket agent daemon: one in-memory slot behind a Unix socket.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::agent::assuan;
use crate::util::{create_private_dir, effective_uid, set_mode};

/// Longest request line accepted (escaped blobs are at most 3x their size).
const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

type Slot = Arc<RwLock<Option<Zeroizing<Vec<u8>>>>>;

pub struct SocketAgentServer {
    path: PathBuf,
    listener: UnixListener,
    slot: Slot,
}

impl SocketAgentServer {
    /// Bind the socket at `path`.
    ///
    /// The parent directory is created owner-only. A leftover socket file from
    /// a dead agent is replaced; a live one makes this fail with `AddrInUse`.
    pub fn bind(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }

        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("socket agent already listening on {}", path.display()),
                ));
            }
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        set_mode(path, 0o600)?;

        Ok(Self {
            path: path.to_path_buf(),
            listener,
            slot: Arc::new(RwLock::new(None)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> io::Result<()> {
        info!("Socket agent listening on {}", self.path.display());
        let uid = effective_uid();
        loop {
            let (stream, _) = self.listener.accept().await?;

            match stream.peer_cred() {
                Ok(cred) if cred.uid() == uid => {}
                Ok(cred) => {
                    warn!("Rejected socket agent connection from uid {}", cred.uid());
                    continue;
                }
                Err(e) => {
                    warn!("Could not read socket peer credentials: {}", e);
                    continue;
                }
            }

            let slot = Arc::clone(&self.slot);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, slot).await {
                    debug!("Socket agent connection ended with error: {}", e);
                }
            });
        }
    }
}

impl Drop for SocketAgentServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection(stream: UnixStream, slot: Slot) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half.take(MAX_REQUEST_BYTES));

    let mut line = Zeroizing::new(String::new());
    if reader.read_line(&mut *line).await? == 0 {
        // probe connections close without a request
        return Ok(());
    }

    let request = line.trim_end_matches(['\r', '\n']);
    let (command, argument) = request.split_once(' ').unwrap_or((request, ""));

    let response = match command {
        "GET" => match slot.read().await.as_ref() {
            Some(blob) => format!("D {}\nOK\n", assuan::escape(blob)),
            None => "OK\n".to_string(),
        },
        "PUT" => {
            let blob = Zeroizing::new(assuan::unescape(argument));
            debug!("Socket agent stored {} bytes", blob.len());
            *slot.write().await = Some(blob);
            "OK\n".to_string()
        }
        other => {
            debug!("Socket agent got unknown command {:?}", other);
            "ERR 1 unknown command\n".to_string()
        }
    };

    let response = Zeroizing::new(response);
    write_half.write_all(response.as_bytes()).await?;
    write_half.shutdown().await
}
