//! Event system for campaign progress tracking
//!
//! This module provides an in-process event bus for distributing progress
//! events to subscribers without blocking dispatch workers.
//!
//! The bus uses `tokio::sync::broadcast` for multi-subscriber support.
//! Events are emitted by the engine and responder during long-running
//! operations and can be consumed by any number of subscribers (CLI
//! progress output, log sinks, etc.).
//!
//! If no subscribers exist, events are dropped immediately without
//! allocation or blocking. Subscribers can lag without blocking emitters.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::WorkerState;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing progress events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    ///
    /// The capacity determines how many events can be buffered per subscriber
    /// before older events are dropped (if the subscriber is lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events
    ///
    /// Returns a receiver that will receive all events emitted after
    /// subscription. Multiple subscribers are supported.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Non-blocking. If no subscribers exist, the event is dropped
    /// immediately. If subscribers are lagging, they may miss events
    /// (oldest events are dropped first).
    pub fn emit(&self, event: Event) {
        // send() returns Err if no receivers exist, which is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Events emitted by the dispatch engine and the auto-responder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A campaign began with this many accounts and pending targets
    CampaignStarted { accounts: Vec<String>, pending: usize },

    /// A dispatch worker moved to a new lifecycle state
    WorkerTransition { account: String, state: WorkerState },

    /// One send attempt finished and was recorded in the ledger
    SendRecorded {
        account: String,
        target: String,
        ok: bool,
        detail: Option<String>,
    },

    /// A proxy probe failed and the account fell back to a direct connection
    ProxyFallback { account: String, reason: String },

    /// An account hit a failure that needs an operator decision
    AttentionRequired { account: String, reason: String },

    /// An account was dropped from the campaign after a decision
    AccountSkipped { account: String, reason: String },

    /// The whole campaign was paused; remaining targets stay queued
    CampaignPaused { reason: String },

    /// All workers drained their queues or were skipped
    CampaignCompleted { sent: usize, failed: usize },

    /// The responder answered an inbound thread
    ReplySent { account: String, thread_id: String },

    /// One account's inbox poller stopped after a session failure
    ResponderAccountPaused { account: String, reason: String },

    /// The responder shut down cleanly
    ResponderStopped { replied: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.emit(Event::CampaignStarted {
            accounts: vec!["ana".to_string()],
            pending: 40,
        });

        let received = receiver.recv().await.unwrap();
        match received {
            Event::CampaignStarted { accounts, pending } => {
                assert_eq!(accounts, vec!["ana"]);
                assert_eq!(pending, 40);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        event_bus.emit(Event::SendRecorded {
            account: "ana".to_string(),
            target: "bob".to_string(),
            ok: true,
            detail: None,
        });

        // Both receivers should get the event
        for receiver in [&mut receiver1, &mut receiver2] {
            match receiver.recv().await.unwrap() {
                Event::SendRecorded { account, target, ok, .. } => {
                    assert_eq!(account, "ana");
                    assert_eq!(target, "bob");
                    assert!(ok);
                }
                _ => panic!("Wrong event type received"),
            }
        }
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let event_bus = EventBus::new(10);

        // Emit event with no subscribers - should not panic or block
        event_bus.emit(Event::CampaignPaused {
            reason: "ledger write failed".to_string(),
        });

        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_serialization() {
        let event = Event::AttentionRequired {
            account: "ana".to_string(),
            reason: "session expired".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("attention_required"));
        assert!(json.contains("session expired"));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        match deserialized {
            Event::AttentionRequired { account, reason } => {
                assert_eq!(account, "ana");
                assert_eq!(reason, "session expired");
            }
            _ => panic!("Deserialization failed"),
        }
    }

    #[tokio::test]
    async fn test_worker_transition_event() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.emit(Event::WorkerTransition {
            account: "ana".to_string(),
            state: WorkerState::CoolingDown,
        });

        match receiver.recv().await.unwrap() {
            Event::WorkerTransition { state, .. } => {
                assert_eq!(state, WorkerState::CoolingDown);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let event_bus = EventBus::new(10);
        assert_eq!(event_bus.subscriber_count(), 0);

        let _receiver1 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 1);

        let _receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);
    }
}
