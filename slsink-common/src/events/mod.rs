//! Event types for the sink event system
//!
//! Provides the SinkEvent enum and the EventBus used to publish it.

mod lifecycle_types;

pub use lifecycle_types::LifecycleState;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Sink event types
///
/// Every event carries the id of the sink instance that produced it, so several
/// sinks can share one bus. Events are never emitted from the hardware completion
/// callback; the monitoring task translates callback counters into events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SinkEvent {
    /// Lifecycle state changed
    StateChanged {
        sink_id: Uuid,
        /// State before change
        old_state: LifecycleState,
        /// State after change
        new_state: LifecycleState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Hardware acknowledged its first unit; latency is now measurable
    HardwareStarted {
        sink_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Hardware refused a staged unit; its bytes were dropped
    EnqueueRejected {
        sink_id: Uuid,
        /// Bytes discarded with the unit
        dropped_bytes: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Producer write did not fit in the ring buffer and was dropped
    WriteRejected {
        sink_id: Uuid,
        /// Bytes the producer offered
        requested: usize,
        /// Free ring space at the time
        space: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Buffered audio was drained (soft) or discarded (hard)
    Flushed {
        sink_id: Uuid,
        drain: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Units are queued and playing but no completion arrived recently
    CallbackStalled {
        sink_id: Uuid,
        /// Completions observed so far
        completions: u64,
        /// Milliseconds since the last completion
        idle_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SinkEvent {
    /// Id of the sink that emitted this event
    pub fn sink_id(&self) -> Uuid {
        match self {
            SinkEvent::StateChanged { sink_id, .. }
            | SinkEvent::HardwareStarted { sink_id, .. }
            | SinkEvent::EnqueueRejected { sink_id, .. }
            | SinkEvent::WriteRejected { sink_id, .. }
            | SinkEvent::Flushed { sink_id, .. }
            | SinkEvent::CallbackStalled { sink_id, .. } => *sink_id,
        }
    }
}

/// Event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use slsink_common::events::{EventBus, LifecycleState, SinkEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SinkEvent::StateChanged {
///     sink_id: uuid::Uuid::new_v4(),
///     old_state: LifecycleState::Started,
///     new_state: LifecycleState::Paused,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(SinkEvent::StateChanged { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SinkEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SinkEvent,
    ) -> Result<usize, broadcast::error::SendError<SinkEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SinkEvent) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        let result = bus.emit(SinkEvent::HardwareStarted {
            sink_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let id = Uuid::new_v4();
        let event = SinkEvent::Flushed {
            sink_id: id,
            drain: false,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Flushed");
        assert_eq!(json["drain"], false);
        assert_eq!(event.sink_id(), id);
    }

    #[test]
    fn test_subscriber_count_tracks_receivers() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 10);
    }
}
