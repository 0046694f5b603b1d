//! Multiplexed RPC channel to the daemon.
//!
//! One socket carries any number of concurrent calls. Each call registers a
//! oneshot under its id; a reader task completes them as responses arrive,
//! in whatever order the daemon finishes them.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};

use panrpc_core::protocol::envelope::{Request, Response};
use panrpc_core::protocol::frame::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_BYTES};
use panrpc_core::{PanRpcError, Result, DEFAULT_SOCKET_PATH};

type Pending = DashMap<u64, oneshot::Sender<Response>>;

/// Cheap-clone handle; all clones share one connection.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    out_tx: mpsc::Sender<Bytes>,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    calls_issued: AtomicU64,
    max_frame_bytes: usize,
}

impl RpcClient {
    /// Connect to the daemon's well-known socket.
    pub async fn connect_default() -> Result<Self> {
        Self::connect(DEFAULT_SOCKET_PATH).await
    }

    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            PanRpcError::Transport(format!("connect {} failed: {e}", path.display()))
        })?;
        Ok(Self::from_stream(stream, DEFAULT_MAX_FRAME_BYTES))
    }

    /// Wrap an already connected stream. Must be called inside a tokio
    /// runtime.
    pub fn from_stream(stream: UnixStream, max_frame_bytes: usize) -> Self {
        let (rd, wr) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(1024);
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(wr, out_rx));
        tokio::spawn(read_loop(
            rd,
            Arc::clone(&pending),
            Arc::clone(&closed),
            max_frame_bytes,
        ));

        Self {
            inner: Arc::new(Inner {
                out_tx,
                pending,
                closed,
                next_id: AtomicU64::new(1),
                calls_issued: AtomicU64::new(0),
                max_frame_bytes,
            }),
        }
    }

    /// Typed call. An empty response reads as `Resp::default()`.
    pub async fn call<Req, Resp>(&self, svc: &str, method: &str, data: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Default,
    {
        match self.call_raw(svc, method, data).await? {
            Some(v) => serde_json::from_value(v).map_err(|e| {
                PanRpcError::Transport(format!("{svc}.{method} invalid response data: {e}"))
            }),
            None => Ok(Resp::default()),
        }
    }

    pub async fn call_raw<Req: Serialize>(
        &self,
        svc: &str,
        method: &str,
        data: &Req,
    ) -> Result<Option<Value>> {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(&Request::new(id, svc, method, data)?, inner.max_frame_bytes)?;

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        // The reader flags `closed` before draining, so a call registered
        // after the drain sees the flag here.
        if inner.closed.load(Ordering::SeqCst) {
            inner.pending.remove(&id);
            return Err(PanRpcError::Transport("connection closed".into()));
        }

        if inner.out_tx.send(frame).await.is_err() {
            inner.pending.remove(&id);
            return Err(PanRpcError::Transport("connection closed".into()));
        }
        inner.calls_issued.fetch_add(1, Ordering::Relaxed);

        let resp = rx
            .await
            .map_err(|_| PanRpcError::Transport(format!("{svc}.{method}: connection lost")))?;
        resp.into_result()
    }

    /// Number of requests handed to the socket so far.
    pub fn calls_issued(&self) -> u64 {
        self.inner.calls_issued.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

async fn write_loop(mut wr: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = out_rx.recv().await {
        if let Err(e) = wr.write_all(&frame).await {
            tracing::debug!(error = %e, "rpc write failed");
            break;
        }
    }
}

async fn read_loop(
    mut rd: OwnedReadHalf,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    max_frame_bytes: usize,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    'read: loop {
        match rd.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "rpc read failed");
                break;
            }
        }

        loop {
            match decode_frame(&mut buf, max_frame_bytes) {
                Ok(Some(body)) => match Response::parse(&body) {
                    Ok(resp) => {
                        if let Some((_, tx)) = pending.remove(&resp.id) {
                            let _ = tx.send(resp);
                        } else {
                            tracing::debug!(id = resp.id, "response for unknown call");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed response"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "rpc framing error");
                    break 'read;
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every outstanding call.
    pending.clear();
}
