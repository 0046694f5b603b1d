//! Per-connection loop.
//!
//! Responsibilities:
//! - Split the socket: one reader feeding the frame decoder, one writer
//!   draining an outbound queue.
//! - Spawn every request on its own task so slow policy calls never block
//!   reading the next request. Responses go out in completion order.
//! - Close on EOF, I/O error, or an oversized frame.

use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::Instrument;

use panrpc_core::protocol::envelope::{Request, Response};
use panrpc_core::protocol::frame::{decode_frame, encode_frame};
use panrpc_core::{PanRpcError, Result};

use crate::app_state::AppState;

/// Enough of an envelope to address an error reply when full parsing fails.
#[derive(Deserialize)]
struct IdProbe {
    id: u64,
}

pub async fn serve(state: AppState, stream: UnixStream) {
    tracing::debug!("connection opened");
    if let Err(e) = run(state, stream).await {
        tracing::debug!(error = %e, "connection closed with error");
    } else {
        tracing::debug!("connection closed");
    }
}

async fn run(state: AppState, stream: UnixStream) -> Result<()> {
    let max_frame_bytes = state.cfg().daemon.max_frame_bytes;
    let (mut rd, mut wr) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(1024);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                let Some(frame) = maybe_out else { break; };
                wr.write_all(&frame)
                    .await
                    .map_err(|e| PanRpcError::Transport(format!("write failed: {e}")))?;
            }

            // inbound reader
            n = rd.read_buf(&mut buf) => {
                let n = n.map_err(|e| PanRpcError::Transport(format!("read failed: {e}")))?;
                if n == 0 {
                    break;
                }

                loop {
                    match decode_frame(&mut buf, max_frame_bytes) {
                        Ok(Some(body)) => spawn_request(&state, body, out_tx.clone()),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "rejecting frame, closing connection");
                            if let Ok(frame) = encode_frame(&Response::err(0, &e), max_frame_bytes) {
                                let _ = wr.write_all(&frame).await;
                            }
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn spawn_request(state: &AppState, body: Bytes, out_tx: mpsc::Sender<Bytes>) {
    let state = state.clone();
    tokio::spawn(
        async move {
            let max_frame_bytes = state.cfg().daemon.max_frame_bytes;
            let resp = handle(&state, &body).await;
            let frame = match encode_frame(&resp, max_frame_bytes) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(id = resp.id, error = %e, "response not encodable");
                    match encode_frame(&Response::err(resp.id, &e), max_frame_bytes) {
                        Ok(f) => f,
                        Err(_) => return,
                    }
                }
            };
            // Receiver gone means the connection already closed.
            let _ = out_tx.send(frame).await;
        }
        .in_current_span(),
    );
}

async fn handle(state: &AppState, body: &[u8]) -> Response {
    let req = match Request::parse(body) {
        Ok(req) => req,
        Err(e) => {
            let id = serde_json::from_slice::<IdProbe>(body).map(|p| p.id).unwrap_or(0);
            tracing::debug!(id, error = %e, "malformed request");
            return Response::err(id, &e);
        }
    };

    tracing::debug!(svc = %req.svc, method = %req.method, id = req.id, "request");
    match state.dispatcher().dispatch(&req).await {
        Ok(data) => Response::ok(req.id, data),
        Err(e) => {
            if e.is_protocol() {
                tracing::debug!(svc = %req.svc, method = %req.method, id = req.id, error = %e, "request rejected");
            } else {
                tracing::warn!(svc = %req.svc, method = %req.method, id = req.id, error = %e, "request failed");
            }
            Response::err(req.id, &e)
        }
    }
}
