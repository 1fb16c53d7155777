//! Splits the inbound byte stream into request lines and answers them one at
//! a time.
//!
//! Requests are dispatched strictly in arrival order: the next line is not
//! read until the current request's response has been queued.

use crate::dispatcher::Dispatcher;
use crate::output::ProtocolSink;
use lxbridge_plugin::{RequestId, Response};
use serde_json::{Map, Value};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line longer than the limit was dropped.
    Oversized,
}

/// Incremental newline splitter with a per-line size bound.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.discarding {
            if let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
                self.discarding = false;
                self.buf.extend_from_slice(&chunk[pos + 1..]);
            }
        } else {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Next complete frame, if any. Call until it returns `None`.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.discarding {
            return None;
        }
        match self.buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                Some(self.frame(&line[..pos]))
            }
            None if self.buf.len() > self.max_line_bytes => {
                self.buf.clear();
                self.discarding = true;
                Some(Frame::Oversized)
            }
            None => None,
        }
    }

    /// The final unterminated line at end of input, if any.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.discarding || self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        Some(self.frame(&line))
    }

    fn frame(&self, line: &[u8]) -> Frame {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() > self.max_line_bytes {
            Frame::Oversized
        } else {
            Frame::Line(String::from_utf8_lossy(line).into_owned())
        }
    }
}

/// Reads requests from `reader` until end of input.
pub async fn serve<R>(
    mut reader: R,
    dispatcher: &Dispatcher,
    sink: &ProtocolSink,
    max_line_bytes: usize,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new(max_line_bytes);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        framer.push(&chunk[..read]);
        while let Some(frame) = framer.next_frame() {
            answer(frame, dispatcher, sink).await;
        }
    }
    if let Some(frame) = framer.finish() {
        answer(frame, dispatcher, sink).await;
    }
    tracing::info!("input closed");
    Ok(())
}

async fn answer(frame: Frame, dispatcher: &Dispatcher, sink: &ProtocolSink) {
    let response = match frame {
        Frame::Line(line) => process_line(&line, dispatcher).await,
        Frame::Oversized => {
            tracing::error!("discarded oversized request line");
            Some(Response::failure(None, "Request line exceeds maximum length"))
        }
    };
    if let Some(response) = response {
        sink.respond(response);
    }
}

/// Turns one inbound line into its response. Blank lines yield nothing.
pub async fn process_line(line: &str, dispatcher: &Dispatcher) -> Option<Response> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("unparseable request line: {e}");
            return Some(Response::failure(None, format!("Parse error: {e}")));
        }
    };
    let Some(request) = request.as_object() else {
        return Some(Response::failure(None, "Invalid request: expected a JSON object"));
    };

    let id = match request.get("id").map(RequestId::from_value) {
        Some(Some(id)) => id,
        Some(None) => {
            return Some(Response::failure(
                None,
                "Invalid request: id must be a number or a string",
            ))
        }
        None => return Some(Response::failure(None, "Invalid request: missing id")),
    };
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return Some(Response::failure(Some(id), "Invalid request: missing method"));
    };
    let params = match request.get("params") {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(params) => params.clone(),
    };

    let pending = PendingRequest::new(id);
    tracing::info!(id = %pending.id, method, "request");
    let outcome = dispatcher.call(method, params).await;
    Some(pending.complete(method, outcome))
}

/// An in-flight request; lives for one dispatcher call.
struct PendingRequest {
    id: RequestId,
    issued_at: Instant,
}

impl PendingRequest {
    fn new(id: RequestId) -> Self {
        Self {
            id,
            issued_at: Instant::now(),
        }
    }

    fn complete(
        self,
        method: &str,
        outcome: Result<Value, crate::dispatcher::DispatchError>,
    ) -> Response {
        let elapsed_ms = self.issued_at.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                tracing::info!(id = %self.id, method, elapsed_ms, "request completed");
                Response::success(self.id, result)
            }
            Err(err) => {
                tracing::error!(id = %self.id, method, elapsed_ms, "request failed: {err}");
                Response::failure(Some(self.id), err.to_string())
            }
        }
    }
}
