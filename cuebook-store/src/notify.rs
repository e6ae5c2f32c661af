//! Change notifications fanned out to subscribers.
//!
//! Uses a tokio broadcast channel: one send reaches every receiver, each of
//! which buffers up to `capacity` events before it starts lagging. Sending
//! with no subscribers is not an error.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use cuebook_core::{RevisionId, ScriptId};

/// Something observable changed in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptEvent {
    /// Line content of a revision changed. `page` is set for page edits.
    ScriptChanged {
        script_id: ScriptId,
        revision_id: RevisionId,
        page: Option<u32>,
    },
    /// A revision was created or deleted.
    RevisionsChanged { script_id: ScriptId },
    CurrentRevisionChanged {
        script_id: ScriptId,
        revision_id: Option<RevisionId>,
    },
    /// Cues or cuts of a revision changed.
    CuesChanged {
        script_id: ScriptId,
        revision_id: RevisionId,
    },
    /// A fresh compiled script is available.
    CompiledReady {
        revision_id: RevisionId,
        edit_seq: u64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub events_sent: u64,
    /// Events sent while nobody was subscribed.
    pub events_unobserved: u64,
    pub subscribers: usize,
}

pub struct ChangeNotifier {
    sender: broadcast::Sender<ScriptEvent>,
    capacity: usize,
    events_sent: AtomicU64,
    events_unobserved: AtomicU64,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
            events_sent: AtomicU64::new(0),
            events_unobserved: AtomicU64::new(0),
        }
    }

    /// Publish an event. Returns the number of receivers it reached.
    pub fn notify(&self, event: ScriptEvent) -> usize {
        log::debug!("Notify {event:?}");
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                self.events_unobserved.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScriptEvent> {
        self.sender.subscribe()
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_unobserved: self.events_unobserved.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed() -> ScriptEvent {
        ScriptEvent::RevisionsChanged {
            script_id: ScriptId::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_fan_out() {
        let notifier = ChangeNotifier::new(16);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        let event = changed();
        assert_eq!(notifier.notify(event.clone()), 2);
        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_no_subscribers_is_not_an_error() {
        let notifier = ChangeNotifier::new(16);
        assert_eq!(notifier.notify(changed()), 0);

        let stats = notifier.stats();
        assert_eq!(stats.events_sent, 1);
        assert_eq!(stats.events_unobserved, 1);
        assert_eq!(stats.subscribers, 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber() {
        let notifier = ChangeNotifier::new(2);
        let mut rx = notifier.subscribe();
        for _ in 0..5 {
            notifier.notify(changed());
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(notifier.capacity(), 2);
    }
}
