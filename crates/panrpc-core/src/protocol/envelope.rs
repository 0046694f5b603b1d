//! Request/response envelopes.
//!
//! `Request.data` stays a `RawValue` so the owning service parses its own
//! message shape, and the dispatcher only looks at `svc`/`method`.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{PanRpcError, Result};
use crate::protocol::PROTOCOL_VERSION;

/// Inbound call.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// Protocol version.
    pub v: u8,
    /// Caller-chosen correlation id, echoed in the response.
    pub id: u64,
    /// Service name (`Selector` or `Tracer`).
    pub svc: String,
    /// Method within the service.
    pub method: String,
    /// Optional payload, stored as raw JSON (lazy parsing).
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl Request {
    pub fn new<T: Serialize>(id: u64, svc: &str, method: &str, data: &T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(data)
            .map_err(|e| PanRpcError::BadRequest(format!("json encode failed: {e}")))?;
        Ok(Self {
            v: PROTOCOL_VERSION,
            id,
            svc: svc.to_string(),
            method: method.to_string(),
            data: Some(raw),
        })
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let req: Request = serde_json::from_slice(body)
            .map_err(|e| PanRpcError::BadRequest(format!("invalid request envelope: {e}")))?;
        if req.v != PROTOCOL_VERSION {
            return Err(PanRpcError::BadRequest(format!(
                "unsupported protocol version: {}",
                req.v
            )));
        }
        Ok(req)
    }

    /// Decode the payload into the service's message shape. A missing payload
    /// reads as the shape's default (every field absent).
    pub fn payload<T: for<'de> Deserialize<'de> + Default>(&self) -> Result<T> {
        match &self.data {
            Some(raw) => serde_json::from_str(raw.get()).map_err(|e| {
                PanRpcError::BadRequest(format!("{}.{} invalid data: {e}", self.svc, self.method))
            }),
            None => Ok(T::default()),
        }
    }
}

/// Error block of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireError {
    pub code: String,
    pub msg: String,
}

/// Outbound reply.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Response {
    pub v: u8,
    pub id: u64,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(id: u64, data: Option<Value>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id,
            data,
            error: None,
        }
    }

    pub fn err(id: u64, e: &PanRpcError) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id,
            data: None,
            error: Some(WireError {
                code: e.code().as_str().to_string(),
                msg: e.detail(),
            }),
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| PanRpcError::Transport(format!("invalid response envelope: {e}")))
    }

    /// Turn the envelope back into the call's outcome.
    pub fn into_result(self) -> Result<Option<Value>> {
        match self.error {
            Some(e) => Err(PanRpcError::from_wire(&e.code, &e.msg)),
            None => Ok(self.data),
        }
    }
}
