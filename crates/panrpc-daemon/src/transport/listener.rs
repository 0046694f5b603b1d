use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;

use panrpc_core::{PanRpcError, Result};

/// Removes the socket file when dropped.
#[derive(Debug)]
pub struct SocketGuard {
    path: PathBuf,
}

impl SocketGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(socket = %self.path.display(), error = %e, "socket cleanup failed");
            }
        }
    }
}

/// Bind `path`, replacing a stale socket file left by a dead daemon. A
/// socket that still accepts connections belongs to a live daemon and is
/// left alone.
pub fn bind(path: &Path) -> Result<(UnixListener, SocketGuard)> {
    if path.exists() {
        if StdUnixStream::connect(path).is_ok() {
            return Err(PanRpcError::Transport(format!(
                "{} is in use by another daemon",
                path.display()
            )));
        }
        tracing::info!(socket = %path.display(), "removing stale socket");
        fs::remove_file(path).map_err(|e| {
            PanRpcError::Transport(format!("remove stale socket {}: {e}", path.display()))
        })?;
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| PanRpcError::Transport(format!("bind {} failed: {e}", path.display())))?;
    Ok((
        listener,
        SocketGuard {
            path: path.to_path_buf(),
        },
    ))
}
