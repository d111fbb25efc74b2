use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Line-oriented output for channel diagnostics.
///
/// Channels only emit after releasing their guard, so a sink may block or
/// take locks of its own.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Forwards each line as an `info` event on the `chantools::diag` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "chantools::diag", "{}", line);
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _line: &str) {}
}

/// Queues lines until the owner flushes them.
///
/// Cloning gives another handle onto the same queue, so one clone can be
/// handed to a channel while the other is kept for reading.
#[derive(Debug, Clone)]
pub struct BufferedSink {
    sender: mpsc::UnboundedSender<String>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Takes every line emitted so far without waiting for more.
    pub fn drain_pending(&self) -> Vec<String> {
        let mut receiver = self.receiver.lock();
        let mut lines = Vec::new();
        while let Ok(line) = receiver.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Writes pending lines to `out`, returning how many were written.
    pub fn flush_to<W: Write>(&self, out: &mut W, prefix: &str) -> io::Result<usize> {
        let lines = self.drain_pending();
        for line in &lines {
            writeln!(out, "{}{}", prefix, line)?;
        }
        out.flush()?;
        Ok(lines.len())
    }
}

impl Default for BufferedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for BufferedSink {
    fn emit(&self, line: &str) {
        // The receiver lives as long as any clone of the sink, so this only
        // fails once every reader is gone.
        let _ = self.sender.send(line.to_string());
    }
}
