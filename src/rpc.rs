// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Line-delimited JSON RPC front end.
//!
//! One request per line, one response per line:
//!
//! ```text
//! → {"id":"1","method":"append","params":{"namespace":"services","key":"user1","value":"login"}}
//! ← {"id":"1","ok":true,"result":{"new":true}}
//! → {"id":"2","method":"get","params":{"namespace":"services","key":"user1"}}
//! ← {"id":"2","ok":false,"error":{"code":"WrongMode","message":"get is not allowed in WriteOnly mode"}}
//! ```
//!
//! Methods: `append`, `append_batch`, `get`, `ping`. A line that cannot be
//! decoded gets a `BadRequest` (or `UnknownMethod`) error and the connection
//! stays open. Lines longer than [`MAX_LINE_BYTES`] are discarded unread and
//! answered with `BadRequest`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::service::{CacheService, ServiceError};

/// Longest request line accepted, newline excluded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),
    #[error("Invalid params for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },
    #[error("Request line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

impl RpcError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) | Self::InvalidParams { .. } | Self::LineTooLong { .. } => "BadRequest",
            Self::UnknownMethod(_) => "UnknownMethod",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendParams {
    pub namespace: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendBatchParams {
    pub namespaces: Vec<String>,
    pub keys: Vec<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetParams {
    pub namespace: String,
    pub key: String,
}

/// Decoded method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Append(AppendParams),
    AppendBatch(AppendBatchParams),
    Get(GetParams),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Echoed in the response
    pub id: String,
    pub call: Call,
}

/// Envelope as it appears on the wire, before params are typed.
#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    id: String,
    method: String,
    #[serde(default)]
    params: Value,
}

/// A line that could not be turned into a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    /// Request id if the envelope itself parsed
    pub id: String,
    pub error: RpcError,
}

impl Request {
    pub fn decode(line: &str) -> Result<Self, DecodeFailure> {
        let raw: RawRequest = serde_json::from_str(line).map_err(|e| DecodeFailure {
            id: String::new(),
            error: RpcError::Malformed(e.to_string()),
        })?;

        let call = match raw.method.as_str() {
            "append" => params(&raw).map(Call::Append),
            "append_batch" => params(&raw).map(Call::AppendBatch),
            "get" => params(&raw).map(Call::Get),
            "ping" => Ok(Call::Ping),
            other => Err(RpcError::UnknownMethod(other.to_string())),
        };

        match call {
            Ok(call) => Ok(Self { id: raw.id, call }),
            Err(error) => Err(DecodeFailure { id: raw.id, error }),
        }
    }
}

fn params<T: serde::de::DeserializeOwned>(raw: &RawRequest) -> Result<T, RpcError> {
    T::deserialize(&raw.params).map_err(|e| RpcError::InvalidParams {
        method: raw.method.clone(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    /// Items applied before a batch aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<usize>,
}

impl From<&ServiceError> for ApiError {
    fn from(e: &ServiceError) -> Self {
        Self {
            code: e.kind().code().to_string(),
            message: e.to_string(),
            applied: e.applied(),
        }
    }
}

impl From<&RpcError> for ApiError {
    fn from(e: &RpcError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            applied: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    pub fn success(id: &str, result: Value) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: &str, error: ApiError) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Run one decoded request against the service.
pub async fn dispatch(service: &CacheService, request: Request) -> Response {
    let id = request.id;
    let outcome: Result<Value, ServiceError> = match request.call {
        Call::Append(p) => service
            .append(&p.namespace, &p.key, &p.value)
            .await
            .map(|fresh| json!({ "new": fresh })),
        Call::AppendBatch(p) => service
            .append_batch(&p.namespaces, &p.keys, &p.values)
            .await
            .map(|r| json!({ "applied": r.applied, "duplicates": r.duplicates })),
        Call::Get(p) => service
            .get(&p.namespace, &p.key)
            .await
            .map(|value| json!({ "value": value })),
        Call::Ping => Ok(json!("pong")),
    };

    match outcome {
        Ok(result) => Response::success(&id, result),
        Err(e) => {
            debug!(id = %id, error = %e, "Request failed");
            Response::error(&id, ApiError::from(&e))
        }
    }
}

/// Decode one line and dispatch it.
pub async fn handle_line(service: &CacheService, line: &str) -> Response {
    match Request::decode(line) {
        Ok(request) => dispatch(service, request).await,
        Err(failure) => {
            debug!(error = %failure.error, "Undecodable request");
            Response::error(&failure.id, ApiError::from(&failure.error))
        }
    }
}

/// Accept connections until `shutdown` flips to `true`, then wait for open
/// connections to finish their current request.
pub async fn serve(
    listener: TcpListener,
    service: Arc<CacheService>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, "RPC listener accepting connections");
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Connection accepted");
                        crate::metrics::record_connection();
                        connections.spawn(connection(stream, Arc::clone(&service), shutdown.clone()));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            // Reap finished connection tasks as we go
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(open = connections.len(), "RPC listener stopped, waiting for connections");
    while connections.join_next().await.is_some() {}
    Ok(())
}

/// One request line off the wire.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete(String),
    /// Longer than the limit; the rest of it has been discarded
    TooLong,
    Eof,
}

/// Read up to the next newline, buffering at most `limit + 1` bytes.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader).take(limit as u64 + 1).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Line::Eof);
    }

    let terminated = buf.last() == Some(&b'\n');
    if terminated {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() <= limit {
        return Ok(Line::Complete(String::from_utf8_lossy(buf).into_owned()));
    }

    // Skip to the end of the oversized line without holding it
    loop {
        buf.clear();
        let read = (&mut *reader).take(limit as u64).read_until(b'\n', buf).await?;
        if read == 0 || buf.last() == Some(&b'\n') {
            break;
        }
    }
    buf.clear();
    Ok(Line::TooLong)
}

async fn connection(stream: TcpStream, service: Arc<CacheService>, mut shutdown: watch::Receiver<bool>) {
    let peer = stream.peer_addr().ok();
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut buf = Vec::new();

    loop {
        let line = tokio::select! {
            line = read_line(&mut reader, &mut buf, MAX_LINE_BYTES) => line,
            _ = shutdown.changed() => break,
        };

        let response = match line {
            Ok(Line::Complete(line)) if line.trim().is_empty() => continue,
            Ok(Line::Complete(line)) => handle_line(&service, &line).await,
            Ok(Line::TooLong) => {
                warn!(?peer, limit = MAX_LINE_BYTES, "Oversized request line discarded");
                let error = RpcError::LineTooLong { limit: MAX_LINE_BYTES };
                Response::error("", ApiError::from(&error))
            }
            Ok(Line::Eof) => break,
            Err(e) => {
                warn!(?peer, error = %e, "Read failed, dropping connection");
                break;
            }
        };

        let mut encoded = match serde_json::to_string(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Failed to encode response");
                continue;
            }
        };
        encoded.push('\n');
        if let Err(e) = write.write_all(encoded.as_bytes()).await {
            warn!(?peer, error = %e, "Write failed, dropping connection");
            break;
        }
    }
    debug!(?peer, "Connection closed");
}
