//! Shared helpers: a real daemon on a temp socket, and a scripted fake peer.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use panrpc_core::protocol::envelope::{Request, Response};
use panrpc_core::protocol::frame::{encode_frame, DEFAULT_MAX_FRAME_BYTES};
use panrpc_daemon::config::DaemonConfig;
use panrpc_daemon::policy::PolicyEngine;
use panrpc_daemon::{AppState, Daemon};

pub struct TestDaemon {
    pub socket: PathBuf,
    pub state: AppState,
    stop: oneshot::Sender<()>,
    task: JoinHandle<panrpc_core::Result<()>>,
    _dir: TempDir,
}

impl TestDaemon {
    /// Daemon running `source` as its policy script.
    pub fn start(source: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("policy.lua");
        fs::write(&script, source).unwrap();
        let cfg = DaemonConfig::new(dir.path().join("panrpc.sock"), script);

        let daemon = Daemon::bind(cfg).unwrap();
        let socket = daemon.socket_path().to_path_buf();
        let state = daemon.state().clone();
        let (stop, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(daemon.run_until(async {
            let _ = rx.await;
        }));

        Self {
            socket,
            state,
            stop,
            task,
            _dir: dir,
        }
    }

    pub fn engine(&self) -> &PolicyEngine {
        self.state.engine()
    }

    /// Integer returned by a script helper.
    pub fn script_int(&self, module: &str, function: &str) -> i64 {
        let out = self.engine().call_named(module, function, vec![]).unwrap();
        out.first().and_then(|v| v.as_i64()).unwrap()
    }

    pub fn script_str(&self, module: &str, function: &str) -> Option<String> {
        let out = self.engine().call_named(module, function, vec![]).unwrap();
        out.first().and_then(|v| v.as_str()).map(str::to_string)
    }

    pub async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

/// Answer one request per entry in `replies`, in order, then hang up.
pub async fn answer_then_hang_up(mut peer: UnixStream, replies: Vec<Option<Value>>) {
    for data in replies {
        let mut header = [0u8; 4];
        peer.read_exact(&mut header).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
        peer.read_exact(&mut body).await.unwrap();
        let req = Request::parse(&body).unwrap();

        let frame = encode_frame(&Response::ok(req.id, data), DEFAULT_MAX_FRAME_BYTES).unwrap();
        peer.write_all(&frame).await.unwrap();
    }
}
