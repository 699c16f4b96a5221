//! Live-viewer output.
//!
//! The engine hands every forwarded document to a [`DocumentSink`]. Sinks are
//! called on the telemetry hot path, so implementations must not block.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use pulse_types::TelemetryDocument;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A document together with every stream it was forwarded to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentMatch {
    pub stream_ids: Vec<String>,
    pub document: TelemetryDocument,
}

/// Receives forwarded documents and per-document evaluation errors.
pub trait DocumentSink: Send + Sync {
    fn on_document(&self, document: DocumentMatch);

    /// Evaluation errors raised by the stream or metric `item_id`.
    fn on_evaluation_errors(&self, item_id: &str, errors: &[String]) {
        tracing::debug!(item_id, ?errors, "filter evaluation errors");
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DocumentSink for NullSink {
    fn on_document(&self, _document: DocumentMatch) {}
}

/// Keeps forwarded documents and errors in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    documents: Mutex<Vec<DocumentMatch>>,
    errors: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<DocumentMatch> {
        self.documents.lock().clone()
    }

    pub fn take_documents(&self) -> Vec<DocumentMatch> {
        std::mem::take(&mut *self.documents.lock())
    }

    /// `(item_id, message)` pairs, in arrival order.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

impl DocumentSink for MemorySink {
    fn on_document(&self, document: DocumentMatch) {
        self.documents.lock().push(document);
    }

    fn on_evaluation_errors(&self, item_id: &str, errors: &[String]) {
        let mut stored = self.errors.lock();
        stored.extend(errors.iter().map(|e| (item_id.to_string(), e.clone())));
    }
}

/// Forwards documents into a bounded channel; drops them when it is full.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<DocumentMatch>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiving half of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DocumentMatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            dropped: AtomicU64::new(0),
        };
        (sink, rx)
    }

    /// Documents dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DocumentSink for ChannelSink {
    fn on_document(&self, document: DocumentMatch) {
        if let Err(e) = self.tx.try_send(document) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(error = %e, "live-viewer channel rejected document");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_types::EventTelemetry;

    fn matched(stream: &str) -> DocumentMatch {
        DocumentMatch {
            stream_ids: vec![stream.to_string()],
            document: EventTelemetry::default().into(),
        }
    }

    #[test]
    fn memory_sink_records_documents_and_errors() {
        let sink = MemorySink::new();
        sink.on_document(matched("a"));
        sink.on_evaluation_errors("a", &["bad comparand".to_string()]);

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.errors(), vec![("a".into(), "bad comparand".into())]);
        assert_eq!(sink.take_documents().len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.on_document(matched("a"));
        sink.on_document(matched("b"));
        assert_eq!(sink.dropped(), 1);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.stream_ids, vec!["a".to_string()]);
    }

    #[test]
    fn channel_sink_counts_closed_receiver() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.on_document(matched("a"));
        assert_eq!(sink.dropped(), 1);
    }
}
