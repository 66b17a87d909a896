//! Event types for the Parrot event system
//!
//! Provides the conversion event definitions and the `EventBus` used to
//! publish them from conversion workers to any number of observers.
//!
//! Workers never block on delivery: events go through a tokio broadcast
//! channel and slow receivers simply lag (see [`EventBus::emit_lossy`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

/// How a conversion ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FinishKind {
    /// Output written, trailer included
    Completed,
    /// Aborted by an error
    Failed,
    /// Aborted by a cancellation request
    Cancelled,
}

impl std::fmt::Display for FinishKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishKind::Completed => write!(f, "Completed"),
            FinishKind::Failed => write!(f, "Failed"),
            FinishKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Conversion event types
///
/// Events are broadcast via [`EventBus`] and can be serialized for transport
/// to a presentation layer. `ConversionStarted` implies `is_converting = true`,
/// `ConversionFinished` implies `is_converting = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversionEvent {
    /// A single-file conversion entered the running state
    ConversionStarted {
        /// Unique id of this conversion run
        conversion_id: Uuid,
        /// Input media file
        source_path: PathBuf,
        /// Output audio file
        target_path: PathBuf,
        /// When the conversion started
        timestamp: DateTime<Utc>,
    },

    /// Progress of a single-file conversion advanced
    ///
    /// Emitted whenever a decoded frame moves the progress fraction forward,
    /// and exactly once with `progress == 1.0` on completion.
    ConversionProgress {
        /// Unique id of this conversion run
        conversion_id: Uuid,
        /// Input media file
        source_path: PathBuf,
        /// Fraction complete, 0.0 - 1.0
        progress: f64,
        /// Update timestamp
        timestamp: DateTime<Utc>,
    },

    /// A single-file conversion reached a terminal state
    ConversionFinished {
        /// Unique id of this conversion run
        conversion_id: Uuid,
        /// Input media file
        source_path: PathBuf,
        /// Output audio file (removed again unless `kind` is Completed)
        target_path: PathBuf,
        /// Terminal state
        kind: FinishKind,
        /// Error text for failed conversions
        message: Option<String>,
        /// When the conversion finished
        timestamp: DateTime<Utc>,
    },

    /// Aggregate progress of a batch advanced
    BatchProgress {
        /// Unique id of the batch
        batch_id: Uuid,
        /// Files attempted so far (succeeded or failed)
        completed: usize,
        /// Files in the batch
        total: usize,
        /// Combined fraction, 0.0 - 1.0
        progress: f64,
        /// Update timestamp
        timestamp: DateTime<Utc>,
    },

    /// A batch stopped, either after the last file or on cancellation
    BatchFinished {
        /// Unique id of the batch
        batch_id: Uuid,
        /// Number of outputs produced
        produced: usize,
        /// Number of files that failed
        failed: usize,
        /// Whether the batch was stopped by cancellation
        cancelled: bool,
        /// When the batch finished
        timestamp: DateTime<Utc>,
    },
}

impl ConversionEvent {
    /// Source file this event refers to, if it is a per-file event
    pub fn source_path(&self) -> Option<&PathBuf> {
        match self {
            ConversionEvent::ConversionStarted { source_path, .. }
            | ConversionEvent::ConversionProgress { source_path, .. }
            | ConversionEvent::ConversionFinished { source_path, .. } => Some(source_path),
            ConversionEvent::BatchProgress { .. } | ConversionEvent::BatchFinished { .. } => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution
///
/// Uses tokio::broadcast internally:
/// - One-to-many delivery
/// - Non-blocking send (never stalls a conversion worker)
/// - Lagging receivers lose the oldest events instead of applying back-pressure
///
/// # Examples
///
/// ```
/// use parrot_common::events::EventBus;
///
/// let event_bus = EventBus::new(1000);
/// let _rx = event_bus.subscribe();
/// assert_eq!(event_bus.subscriber_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConversionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ConversionEvent,
    ) -> Result<usize, broadcast::error::SendError<ConversionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Used for every event published from a conversion worker.
    pub fn emit_lossy(&self, event: ConversionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_event(progress: f64) -> ConversionEvent {
        ConversionEvent::ConversionProgress {
            conversion_id: Uuid::new_v4(),
            source_path: PathBuf::from("/videos/lesson01.mp4"),
            progress,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(progress_event(0.5)).is_err());

        // Lossy emit must not panic either
        bus.emit_lossy(progress_event(0.6));
    }

    #[tokio::test]
    async fn test_eventbus_emit_with_subscriber() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(progress_event(0.25)).unwrap(), 1);

        match rx.recv().await.unwrap() {
            ConversionEvent::ConversionProgress { progress, .. } => {
                assert_eq!(progress, 0.25);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lagging_receiver_drops_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit_lossy(progress_event(i as f64 / 10.0));
        }

        // First receive reports the lag, then the newest events remain
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        match rx.recv().await.unwrap() {
            ConversionEvent::ConversionProgress { progress, .. } => assert_eq!(progress, 0.3),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ConversionEvent::ConversionFinished {
            conversion_id: Uuid::new_v4(),
            source_path: PathBuf::from("a.mkv"),
            target_path: PathBuf::from("a.wav"),
            kind: FinishKind::Cancelled,
            message: None,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ConversionFinished");
        assert_eq!(json["kind"], "Cancelled");

        let back: ConversionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.source_path(), Some(&PathBuf::from("a.mkv")));
    }

    #[test]
    fn test_batch_events_have_no_source() {
        let event = ConversionEvent::BatchProgress {
            batch_id: Uuid::new_v4(),
            completed: 1,
            total: 3,
            progress: 1.0 / 3.0,
            timestamp: Utc::now(),
        };
        assert!(event.source_path().is_none());
    }
}
