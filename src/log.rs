//! Hierarchical scan log.
//!
//! A `LogNode` is a cheap handle onto a shared tree of human-readable entries.
//! Child entries can be added from any worker thread. Every entry is mirrored
//! to `tracing`, so a subscriber sees the same progress without holding on to
//! the tree.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LogNode {
    inner: Arc<Entry>,
}

#[derive(Debug)]
struct Entry {
    message: String,
    started: Instant,
    elapsed: Mutex<Option<Duration>>,
    children: Mutex<Vec<LogNode>>,
}

impl LogNode {
    pub fn root(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }

    fn new(message: String) -> Self {
        Self {
            inner: Arc::new(Entry {
                message,
                started: Instant::now(),
                elapsed: Mutex::new(None),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Appends a child entry and returns it so callers can nest under it.
    pub fn log(&self, message: impl Into<String>) -> LogNode {
        let message = message.into();
        tracing::debug!("{message}");
        self.push(message)
    }

    pub fn log_error(&self, message: impl fmt::Display, err: &dyn std::error::Error) -> LogNode {
        let message = format!("{message}: {err}");
        tracing::warn!("{message}");
        self.push(message)
    }

    /// Stamps the time since this entry was created.
    pub fn add_elapsed_time(&self) {
        *self.inner.elapsed.lock() = Some(self.inner.started.elapsed());
    }

    pub fn elapsed(&self) -> Option<Duration> {
        *self.inner.elapsed.lock()
    }

    pub fn children(&self) -> Vec<LogNode> {
        self.inner.children.lock().clone()
    }

    /// All messages below this node, depth first.
    pub fn messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_messages(&mut out);
        out
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }

    fn push(&self, message: String) -> LogNode {
        let child = LogNode::new(message);
        self.inner.children.lock().push(child.clone());
        child
    }

    fn collect_messages(&self, out: &mut Vec<String>) {
        for child in self.children() {
            out.push(child.inner.message.clone());
            child.collect_messages(out);
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.inner.message, indent = depth * 2)?;
        if let Some(elapsed) = self.elapsed() {
            write!(f, " (took {:.3} ms)", elapsed.as_secs_f64() * 1000.0)?;
        }
        writeln!(f)?;
        for child in self.children() {
            child.write_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for LogNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)
    }
}
