//! The single writer that owns the protocol output stream.
//!
//! Responses, the readiness line and forwarded events all travel through one
//! channel to one task, so lines never interleave. On Unix the task writes to
//! a private duplicate of standard output (see [`claim_stdout`]), so stray
//! writes to fd 1 cannot reach the peer.

use lxbridge_plugin::{EventMessage, Outbound, Response};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

enum Command {
    Line(Outbound),
    Close,
}

/// Cloneable handle for queueing outbound lines.
#[derive(Clone)]
pub struct ProtocolSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl ProtocolSink {
    pub fn respond(&self, response: Response) {
        self.send(Outbound::Response(response));
    }

    pub fn event(&self, event: &str, data: Value) {
        self.send(Outbound::Event(EventMessage {
            event: event.to_string(),
            data,
        }));
    }

    pub fn send(&self, message: Outbound) {
        if self.tx.send(Command::Line(message)).is_err() {
            tracing::warn!("protocol writer is gone; dropping outbound line");
        }
    }

    /// Asks the writer to flush what is queued and stop.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

pub struct ProtocolWriter<W> {
    rx: mpsc::UnboundedReceiver<Command>,
    writer: W,
}

/// Creates a sink/writer pair over `writer`.
pub fn protocol_pipe<W>(writer: W) -> (ProtocolSink, ProtocolWriter<W>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProtocolSink { tx }, ProtocolWriter { rx, writer })
}

impl<W: AsyncWrite + Unpin> ProtocolWriter<W> {
    /// Writes queued lines until closed or every sink is dropped.
    /// Returns the number of lines written.
    pub async fn run(mut self) -> std::io::Result<u64> {
        let mut written = 0;
        while let Some(command) = self.rx.recv().await {
            let message = match command {
                Command::Line(message) => message,
                Command::Close => break,
            };
            let line = encode_line(&message);
            self.writer.write_all(&line).await?;
            self.writer.flush().await?;
            written += 1;
        }
        self.writer.flush().await?;
        Ok(written)
    }
}

/// Moves the protocol stream off fd 1.
///
/// Duplicates the current standard output into a descriptor only the returned
/// file writes to, then points fd 1 at standard error. Afterwards `print!`
/// from a module or a library shows up on stderr instead of between protocol
/// lines. Call once, before anything else writes a protocol line.
#[cfg(unix)]
pub fn claim_stdout() -> std::io::Result<tokio::fs::File> {
    use rustix::stdio;
    use std::io::Write;

    std::io::stdout().flush()?;
    let protocol = rustix::io::dup(stdio::stdout())?;
    stdio::dup2_stdout(stdio::stderr())?;
    tracing::debug!("protocol output moved off fd 1");
    Ok(tokio::fs::File::from_std(std::fs::File::from(protocol)))
}

/// Compact JSON followed by exactly one `\n`.
pub fn encode_line(message: &Outbound) -> Vec<u8> {
    let mut line = serde_json::to_vec(message).unwrap_or_else(|e| {
        tracing::error!("failed to encode outbound message: {e}");
        let fallback = Response::failure(None, format!("failed to encode response: {e}"));
        serde_json::to_vec(&fallback).unwrap_or_default()
    });
    line.push(b'\n');
    line
}
