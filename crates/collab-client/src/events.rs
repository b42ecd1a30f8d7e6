//! In-process fan-out of state changes to interested consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::{Activity, CurrentlyEditing, OnlineUser, ProjectId};

/// Events emitted as the cached state changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    ActivitiesUpdated {
        project_id: ProjectId,
        activities: Vec<Activity>,
    },
    ActivityLogged {
        project_id: ProjectId,
        activity: Activity,
    },
    OnlineUsersUpdated {
        project_id: ProjectId,
        users: Vec<OnlineUser>,
    },
    CurrentlyEditingUpdated {
        project_id: ProjectId,
        editing: Vec<CurrentlyEditing>,
    },
    PollingStarted {
        project_id: ProjectId,
    },
    PollingStopped {
        project_id: ProjectId,
    },
    PollingFailed {
        project_id: ProjectId,
        error: String,
        retry_count: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handle returned by `subscribe`: consume events from `rx`, pass `id`
/// back to unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub rx: mpsc::UnboundedReceiver<ActivityEvent>,
}

/// Event bus backed by one unbounded channel per subscriber
///
/// Each subscriber consumes from its own queue, so a slow or dropped
/// subscriber can never affect other subscribers or the emitter.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<SubscriptionId, mpsc::UnboundedSender<ActivityEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.insert(id, tx);
        Subscription { id, rx }
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().await.remove(&id);
    }

    /// Deliver an event to every live subscriber, pruning dead ones
    pub async fn emit(&self, event: ActivityEvent) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|id, tx| {
            if tx.send(event.clone()).is_err() {
                debug!("Pruning dropped subscriber {:?}", id);
                false
            } else {
                true
            }
        });
    }

    /// Drop every subscription; outstanding receivers observe channel close
    pub async fn clear(&self) {
        self.subscribers.write().await.clear();
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe().await;
        let mut sub2 = bus.subscribe().await;

        bus.emit(ActivityEvent::PollingStarted {
            project_id: ProjectId(1),
        })
        .await;

        assert!(matches!(
            sub1.rx.recv().await,
            Some(ActivityEvent::PollingStarted { .. })
        ));
        assert!(matches!(
            sub2.rx.recv().await,
            Some(ActivityEvent::PollingStarted { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_break_others() {
        let bus = EventBus::new();
        let sub1 = bus.subscribe().await;
        let mut sub2 = bus.subscribe().await;

        drop(sub1);

        bus.emit(ActivityEvent::PollingStopped {
            project_id: ProjectId(1),
        })
        .await;

        assert!(matches!(
            sub2.rx.recv().await,
            Some(ActivityEvent::PollingStopped { .. })
        ));
        // the dead subscriber was pruned during emit
        assert_eq!(bus.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe().await;

        bus.unsubscribe(sub.id).await;
        bus.emit(ActivityEvent::PollingStarted {
            project_id: ProjectId(1),
        })
        .await;

        // sender side is gone, so the channel reports closed
        assert!(sub.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_closes_all_channels() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe().await;
        let mut sub2 = bus.subscribe().await;

        bus.clear().await;
        assert_eq!(bus.subscriber_count().await, 0);

        bus.emit(ActivityEvent::PollingStarted {
            project_id: ProjectId(1),
        })
        .await;

        assert!(sub1.rx.recv().await.is_none());
        assert!(sub2.rx.recv().await.is_none());
    }
}
