//! Progress events emitted while applying operations and running the loop.
//!
//! Sinks are fire-and-forget: `emit` never blocks and never fails, so a slow
//! consumer cannot stall or reorder the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Event category as seen by a live-update consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Status,
    Warning,
    Error,
    OperationSuccess,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::OperationSuccess => "operation_success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub category: EventCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of progress events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Helpers usable on `dyn EventSink`.
pub trait EventSinkExt {
    fn status(&self, message: impl Into<String>);
    fn warning(&self, message: impl Into<String>);
    fn error(&self, message: impl Into<String>);
    fn success(&self, message: impl Into<String>);
}

impl<S: EventSink + ?Sized> EventSinkExt for S {
    fn status(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventCategory::Status, message));
    }

    fn warning(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventCategory::Warning, message));
    }

    fn error(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventCategory::Error, message));
    }

    fn success(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::new(EventCategory::OperationSuccess, message));
    }
}

/// Mirrors events into `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event.category {
            EventCategory::Status | EventCategory::OperationSuccess => {
                info!(category = event.category.as_str(), "{}", event.message)
            }
            EventCategory::Warning => warn!(category = event.category.as_str(), "{}", event.message),
            EventCategory::Error => error!(category = event.category.as_str(), "{}", event.message),
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn messages(&self, category: EventCategory) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.message.clone())
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards events to an unbounded channel, e.g. a live-update stream.
///
/// A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Sends every event to each inner sink in turn.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: ProgressEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_filters_by_category() {
        let sink = MemorySink::new();
        sink.warning("careful");
        sink.success("Applied CREATE_FILE a.py");
        sink.warning("again");

        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.messages(EventCategory::Warning), vec!["careful", "again"]);
    }

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        let fanout = FanoutSink::new().with(Arc::new(sink)).with(Arc::new(TracingSink));
        fanout.status("one");
        fanout.error("two");

        assert_eq!(rx.recv().await.unwrap().message, "one");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.category, EventCategory::Error);
        assert_eq!(second.message, "two");
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.status("nobody listening");
    }
}
