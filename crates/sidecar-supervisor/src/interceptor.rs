//! Output interception for the game server's console.
//!
//! An [`OutputInterceptor`] is a write-sink decorator: every chunk goes to
//! the readiness gate (stdout only), to the real destination so operators
//! still see the console, and to a bounded capture buffer for diagnostics.

use crate::readiness::ReadinessGate;
use futures::io::{AsyncRead, AsyncReadExt};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Default number of bytes kept per captured stream
pub const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

const CHUNK_SIZE: usize = 8 * 1024;

/// Bounded buffer keeping the most recent output of a stream
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<VecDeque<u8>>>,
    limit: usize,
}

impl CaptureBuffer {
    /// Create a buffer keeping at most `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(limit.min(CHUNK_SIZE)))),
            limit,
        }
    }

    /// Append a chunk, dropping the oldest bytes beyond the limit
    pub fn extend(&self, chunk: &[u8]) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let chunk = &chunk[chunk.len().saturating_sub(self.limit)..];
        let overflow = (buf.len() + chunk.len()).saturating_sub(self.limit);
        buf.drain(..overflow);
        buf.extend(chunk);
    }

    /// Everything currently captured, lossily decoded
    pub fn contents(&self) -> String {
        let buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (front, back) = buf.as_slices();
        let mut bytes = Vec::with_capacity(buf.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// The last `lines` lines currently captured
    pub fn tail(&self, lines: usize) -> String {
        let contents = self.contents();
        let all: Vec<&str> = contents.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LIMIT)
    }
}

/// Captured stdout and stderr of the game server
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    /// Captured standard output
    pub stdout: CaptureBuffer,
    /// Captured standard error
    pub stderr: CaptureBuffer,
}

impl CapturedOutput {
    /// Both streams, stdout first
    pub fn combined(&self) -> String {
        let stdout = self.stdout.contents();
        let stderr = self.stderr.contents();
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout,
            (true, false) => stderr,
            (false, false) => format!("{}\n{}", stdout.trim_end(), stderr),
        }
    }

    /// A short excerpt for error messages
    pub fn tail(&self, lines: usize) -> String {
        let stderr = self.stderr.tail(lines);
        if stderr.trim().is_empty() {
            self.stdout.tail(lines)
        } else {
            stderr
        }
    }
}

/// Write-sink decorator feeding each chunk to a readiness gate
pub struct OutputInterceptor<W: Write> {
    forward: W,
    capture: CaptureBuffer,
    gate: Option<ReadinessGate>,
    forward_failed: bool,
}

impl<W: Write> OutputInterceptor<W> {
    /// Forward to `forward` and capture, without inspection
    pub fn passthrough(forward: W, capture: CaptureBuffer) -> Self {
        Self {
            forward,
            capture,
            gate: None,
            forward_failed: false,
        }
    }

    /// Forward, capture and feed every chunk to `gate`
    pub fn with_gate(forward: W, capture: CaptureBuffer, gate: ReadinessGate) -> Self {
        Self {
            gate: Some(gate),
            ..Self::passthrough(forward, capture)
        }
    }

    /// The gate, if this interceptor inspects its stream
    pub fn gate(&self) -> Option<&ReadinessGate> {
        self.gate.as_ref()
    }

    /// Unwrap the forwarding sink
    pub fn into_inner(self) -> W {
        self.forward
    }
}

impl<W: Write> Write for OutputInterceptor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Captured before inspection so a fired gate implies a complete capture.
        self.capture.extend(buf);
        if let Some(gate) = &mut self.gate {
            gate.inspect(buf);
        }

        // A broken console must not stop readiness detection.
        if !self.forward_failed {
            if let Err(e) = self.forward.write_all(buf).and_then(|()| self.forward.flush()) {
                warn!(error = %e, "failed to forward server output");
                self.forward_failed = true;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.forward_failed {
            return Ok(());
        }
        self.forward.flush()
    }
}

/// Copy a child's output stream into an interceptor until it closes
///
/// Each read becomes one chunk, so the gate sees whatever split points the
/// child and the pipe produce.
pub async fn pump<R, W>(mut reader: R, mut interceptor: OutputInterceptor<W>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        interceptor.write_all(&buf[..n])?;
    }
    debug!("output stream closed");
    Ok(())
}
