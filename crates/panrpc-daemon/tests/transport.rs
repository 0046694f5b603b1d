//! Socket-level behaviour: framing, envelopes, and daemon lifecycle.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod script_loader;

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use panrpc_core::protocol::envelope::{Request, Response};
use panrpc_core::protocol::frame::{encode_frame, DEFAULT_MAX_FRAME_BYTES};
use panrpc_core::protocol::selector::SelectorMsg;
use panrpc_core::{ErrorCode, Result};
use panrpc_daemon::config::DaemonConfig;
use panrpc_daemon::Daemon;

use script_loader::config_with_script;

const POLICY: &str = r#"
ticks = 0
function panapi.Periodic(dt) ticks = ticks + 1 end
function panapi.Ticks() return ticks end
"#;

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl Running {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn start(daemon: Daemon) -> Running {
    let (stop, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(daemon.run_until(async {
        let _ = rx.await;
    }));
    Running { stop, task }
}

fn small_frames(mut cfg: DaemonConfig) -> DaemonConfig {
    cfg.daemon.max_frame_bytes = 1024;
    cfg
}

async fn send_raw(stream: &mut UnixStream, body: &[u8]) {
    let len = u32::try_from(body.len()).unwrap();
    stream.write_all(&len.to_be_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
}

async fn send(stream: &mut UnixStream, req: &Request) {
    let frame = encode_frame(req, DEFAULT_MAX_FRAME_BYTES).unwrap();
    stream.write_all(&frame).await.unwrap();
}

async fn recv(stream: &mut UnixStream) -> Response {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut body).await.unwrap();
    Response::parse(&body).unwrap()
}

fn error_code(resp: &Response) -> &str {
    resp.error.as_ref().map(|e| e.code.as_str()).unwrap_or("")
}

#[tokio::test]
async fn serves_requests_and_reports_protocol_errors() {
    let (_dir, cfg) = config_with_script(POLICY);
    let daemon = Daemon::bind(small_frames(cfg)).unwrap();
    let socket = daemon.socket_path().to_path_buf();
    let running = start(daemon);

    let mut stream = UnixStream::connect(&socket).await.unwrap();

    send(&mut stream, &Request::new(1, "Nope", "Path", &json!({})).unwrap()).await;
    let resp = recv(&mut stream).await;
    assert_eq!(resp.id, 1);
    assert_eq!(error_code(&resp), ErrorCode::UnknownMethod.as_str());

    // No `method`: rejected, but the reply still carries the caller's id.
    send_raw(&mut stream, br#"{"v":1,"id":42,"svc":"Selector"}"#).await;
    let resp = recv(&mut stream).await;
    assert_eq!(resp.id, 42);
    assert_eq!(error_code(&resp), ErrorCode::BadRequest.as_str());

    send_raw(&mut stream, br#"{"v":9,"id":43,"svc":"Selector","method":"Path"}"#).await;
    let resp = recv(&mut stream).await;
    assert_eq!(resp.id, 43);
    assert_eq!(error_code(&resp), ErrorCode::BadRequest.as_str());

    // The connection survives malformed requests.
    let path = SelectorMsg::for_pair("a", "b");
    send(&mut stream, &Request::new(44, "Selector", "Path", &path).unwrap()).await;
    let resp = recv(&mut stream).await;
    assert_eq!(resp.id, 44);
    assert!(resp.error.is_none());
    assert_eq!(resp.data.unwrap()["fingerprint"], serde_json::Value::Null);

    running.shutdown().await;
}

#[tokio::test]
async fn missing_fields_map_to_wire_code() {
    let (_dir, cfg) = config_with_script(POLICY);
    let daemon = Daemon::bind(cfg).unwrap();
    let socket = daemon.socket_path().to_path_buf();
    let running = start(daemon);

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    let no_remote = json!({ "local": "1-ff00:0:110,10.0.0.1:1" });
    send(&mut stream, &Request::new(5, "Selector", "Initialize", &no_remote).unwrap()).await;
    let resp = recv(&mut stream).await;
    assert_eq!(resp.id, 5);
    assert_eq!(error_code(&resp), "MISSING_FIELD");
    assert_eq!(resp.error.unwrap().msg, "remote");

    running.shutdown().await;
}

#[tokio::test]
async fn oversized_frame_closes_connection() {
    let (_dir, cfg) = config_with_script(POLICY);
    let daemon = Daemon::bind(small_frames(cfg)).unwrap();
    let socket = daemon.socket_path().to_path_buf();
    let running = start(daemon);

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    stream.write_all(&2048u32.to_be_bytes()).await.unwrap();

    let resp = recv(&mut stream).await;
    assert_eq!(resp.id, 0);
    assert_eq!(error_code(&resp), ErrorCode::BadRequest.as_str());

    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    // Other clients are unaffected.
    let mut other = UnixStream::connect(&socket).await.unwrap();
    send(&mut other, &Request::new(1, "Nope", "X", &json!({})).unwrap()).await;
    assert_eq!(recv(&mut other).await.id, 1);

    running.shutdown().await;
}

#[tokio::test]
async fn socket_is_exclusive_and_removed_on_shutdown() {
    let (_dir, cfg) = config_with_script(POLICY);
    let daemon = Daemon::bind(cfg.clone()).unwrap();
    let socket = daemon.socket_path().to_path_buf();
    let running = start(daemon);

    let err = Daemon::bind(cfg).err().unwrap();
    assert_eq!(err.code(), ErrorCode::Transport);
    assert!(socket.exists());

    running.shutdown().await;
    assert!(!socket.exists());
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let (_dir, cfg) = config_with_script(POLICY);
    let socket = cfg.daemon.socket_path.clone();
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());

    let daemon = Daemon::bind(cfg).unwrap();
    let running = start(daemon);
    UnixStream::connect(&socket).await.unwrap();
    running.shutdown().await;
}

#[tokio::test]
async fn periodic_runs_while_serving() {
    let (_dir, mut cfg) = config_with_script(POLICY);
    cfg.policy.periodic_interval_ms = 10;
    let daemon = Daemon::bind(cfg).unwrap();
    let engine = daemon.state().engine().clone();
    let running = start(daemon);

    tokio::time::sleep(Duration::from_millis(200)).await;
    running.shutdown().await;

    let ticks = engine.call_named("panapi", "Ticks", vec![]).unwrap();
    let ticks = ticks[0].as_i64().unwrap();
    assert!(ticks >= 2, "only {ticks} ticks");

    // Aborted with the daemon.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = engine.call_named("panapi", "Ticks", vec![]).unwrap();
    assert!(after[0].as_i64().unwrap() <= ticks + 1);
}
