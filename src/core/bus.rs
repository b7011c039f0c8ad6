//! Per-run progress bus with replay buffering.
//!
//! One bus exists per run. The runner publishes into it; any number of
//! subscribers read from it, each through its own cursor over the shared
//! buffer. Late subscribers replay the retained history first, then follow
//! live events. The buffer is bounded: on overflow the oldest
//! `progress`-type event is evicted (percentage updates supersede each
//! other), while lifecycle events are never evicted.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::domain::{EventType, ProgressEvent, ProgressUpdate};

/// Ordered event channel for a single run
pub struct ProgressBus {
    run_id: Uuid,
    capacity: usize,
    state: Mutex<BusState>,
    notify: Notify,
}

struct BusState {
    buffer: VecDeque<Arc<ProgressEvent>>,
    next_sequence: u64,
    terminal_published: bool,
}

impl ProgressBus {
    /// Create a bus for a run with the given buffer capacity
    pub fn new(run_id: Uuid, capacity: usize) -> Self {
        Self {
            run_id,
            capacity,
            state: Mutex::new(BusState {
                buffer: VecDeque::new(),
                next_sequence: 0,
                terminal_published: false,
            }),
            notify: Notify::new(),
        }
    }

    /// The run this bus belongs to
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Publish an event, assigning its sequence number.
    ///
    /// Never blocks on subscribers: slow consumers are absorbed by the
    /// bounded buffer and the drop-oldest-progress policy.
    pub async fn publish(&self, mut event: ProgressEvent) -> u64 {
        let sequence = {
            let mut state = self.state.lock().await;

            event.sequence_number = state.next_sequence;
            state.next_sequence += 1;

            if event.is_terminal() {
                state.terminal_published = true;
            }

            if state.buffer.len() >= self.capacity {
                // Lifecycle events are load-bearing and stay; only a
                // progress event may be dropped to make room.
                if let Some(pos) = state
                    .buffer
                    .iter()
                    .position(|e| e.event_type == EventType::Progress)
                {
                    state.buffer.remove(pos);
                }
            }

            let sequence = event.sequence_number;
            state.buffer.push_back(Arc::new(event));
            sequence
        };

        self.notify.notify_waiters();
        sequence
    }

    /// Subscribe to this run's events.
    ///
    /// The subscription replays the current buffer in order, then yields
    /// live events until the run's terminal event has been delivered.
    /// Dropping the subscription is the (idempotent) unsubscribe.
    pub fn subscribe(self: Arc<Self>) -> EventSubscription {
        EventSubscription {
            bus: self,
            cursor: 0,
        }
    }

    /// Snapshot of the currently buffered events, in order
    pub async fn events(&self) -> Vec<Arc<ProgressEvent>> {
        let state = self.state.lock().await;
        state.buffer.iter().cloned().collect()
    }
}

/// A single subscriber's view of a run's event stream
pub struct EventSubscription {
    bus: Arc<ProgressBus>,
    cursor: u64,
}

impl EventSubscription {
    /// Next event in sequence order, or `None` once the run has reached a
    /// terminal state and everything buffered has been delivered.
    ///
    /// Events evicted by the overflow policy before this subscriber read
    /// them are skipped.
    pub async fn next(&mut self) -> Option<Arc<ProgressEvent>> {
        loop {
            let notified = self.bus.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.bus.state.lock().await;

                if let Some(event) = state
                    .buffer
                    .iter()
                    .find(|e| e.sequence_number >= self.cursor)
                {
                    self.cursor = event.sequence_number + 1;
                    return Some(Arc::clone(event));
                }

                if state.terminal_published {
                    return None;
                }
            }

            notified.await;
        }
    }
}

/// Write-only progress handle passed into a step invocation.
///
/// Decouples step code from the bus and from whatever transport later
/// serializes events to subscribers.
pub struct ProgressReporter {
    bus: Arc<ProgressBus>,
    run_id: Uuid,
    step_name: String,
}

impl ProgressReporter {
    pub(crate) fn new(bus: Arc<ProgressBus>, run_id: Uuid, step_name: String) -> Self {
        Self {
            bus,
            run_id,
            step_name,
        }
    }

    /// Publish a progress event for the current step.
    ///
    /// The percentage is clamped to [0, 100]; the message is forwarded
    /// verbatim.
    pub async fn report(&self, percentage: f64, message: impl Into<String>) {
        let update = ProgressUpdate::new(percentage, message);
        self.bus
            .publish(ProgressEvent::progress(
                self.run_id,
                self.step_name.as_str(),
                update,
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_bus(capacity: usize) -> (Arc<ProgressBus>, Uuid) {
        let run_id = Uuid::new_v4();
        (Arc::new(ProgressBus::new(run_id, capacity)), run_id)
    }

    #[tokio::test]
    async fn test_publish_assigns_sequence_numbers() {
        let (bus, run_id) = make_bus(16);

        assert_eq!(bus.publish(ProgressEvent::started(run_id)).await, 0);
        assert_eq!(
            bus.publish(ProgressEvent::step_started(run_id, "extract_csv")).await,
            1
        );
        assert_eq!(bus.publish(ProgressEvent::completed(run_id)).await, 2);
    }

    #[tokio::test]
    async fn test_replay_then_completion() {
        let (bus, run_id) = make_bus(16);

        bus.publish(ProgressEvent::started(run_id)).await;
        bus.publish(ProgressEvent::step_started(run_id, "extract_csv")).await;
        bus.publish(ProgressEvent::step_completed(run_id, "extract_csv")).await;
        bus.publish(ProgressEvent::completed(run_id)).await;

        let mut subscription = bus.subscribe();
        let mut seen = Vec::new();
        while let Some(event) = subscription.next().await {
            seen.push(event.event_type);
        }

        assert_eq!(
            seen,
            vec![
                EventType::Started,
                EventType::StepStarted,
                EventType::StepCompleted,
                EventType::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_live_delivery() {
        let (bus, run_id) = make_bus(16);
        let mut subscription = Arc::clone(&bus).subscribe();

        let publisher = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                bus.publish(ProgressEvent::started(run_id)).await;
                bus.publish(ProgressEvent::completed(run_id)).await;
            })
        };

        let first = subscription.next().await.unwrap();
        assert_eq!(first.event_type, EventType::Started);

        let second = subscription.next().await.unwrap();
        assert_eq!(second.event_type, EventType::Completed);

        assert!(subscription.next().await.is_none());
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest_progress_only() {
        let (bus, run_id) = make_bus(6);

        bus.publish(ProgressEvent::started(run_id)).await;
        bus.publish(ProgressEvent::step_started(run_id, "extract_csv")).await;
        for i in 0..10 {
            let update = ProgressUpdate::new(i as f64 * 10.0, format!("row {}", i));
            bus.publish(ProgressEvent::progress(run_id, "extract_csv", update)).await;
        }
        bus.publish(ProgressEvent::step_completed(run_id, "extract_csv")).await;
        bus.publish(ProgressEvent::completed(run_id)).await;

        let events = bus.events().await;

        // Lifecycle events all survive
        let lifecycle: Vec<EventType> = events
            .iter()
            .filter(|e| e.event_type != EventType::Progress)
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                EventType::Started,
                EventType::StepStarted,
                EventType::StepCompleted,
                EventType::Completed,
            ]
        );

        // Progress events were evicted oldest-first: of the ten published
        // (sequence numbers 2..=11) only the two newest remain
        let progress: Vec<u64> = events
            .iter()
            .filter(|e| e.event_type == EventType::Progress)
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(progress, vec![10, 11]);

        // A late subscriber still observes strictly increasing sequence numbers
        let mut subscription = bus.subscribe();
        let mut last_seq = None;
        while let Some(event) = subscription.next().await {
            if let Some(prev) = last_seq {
                assert!(event.sequence_number > prev);
            }
            last_seq = Some(event.sequence_number);
        }
    }

    #[tokio::test]
    async fn test_subscriber_waits_until_events_arrive() {
        let (bus, run_id) = make_bus(16);
        let mut subscription = Arc::clone(&bus).subscribe();

        // Nothing published yet: next() must still be pending
        let pending =
            tokio::time::timeout(Duration::from_millis(20), subscription.next()).await;
        assert!(pending.is_err());

        bus.publish(ProgressEvent::started(run_id)).await;
        let event = subscription.next().await.unwrap();
        assert_eq!(event.event_type, EventType::Started);
    }

    #[tokio::test]
    async fn test_reporter_clamps_percentage() {
        let (bus, run_id) = make_bus(16);
        let reporter =
            ProgressReporter::new(Arc::clone(&bus), run_id, "extract_csv".to_string());

        reporter.report(150.0, "overshoot").await;
        reporter.report(-3.0, "undershoot").await;

        let events = bus.events().await;
        let percentages: Vec<f64> = events
            .iter()
            .filter_map(|e| e.progress.as_ref().map(|p| p.percentage))
            .collect();
        assert_eq!(percentages, vec![100.0, 0.0]);
    }
}
