//! Lifecycle event fan-out.
//!
//! Every subscriber owns a bounded queue. `publish` hands the event to each
//! queue without waiting on any consumer; a full queue drops the event and
//! records the loss in a [`BusMessage::Overflow`] marker, so one slow
//! subscriber never delays the others.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use berth_common::types::{ContainerId, ContainerState, ExitCode};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Notification of a container state transition.
///
/// `from_state` is `None` for a freshly created container and `to_state`
/// is `None` once the container is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Container that changed.
    pub container_id: ContainerId,
    /// State before the transition.
    pub from_state: Option<ContainerState>,
    /// State after the transition.
    pub to_state: Option<ContainerState>,
    /// When the transition was committed.
    pub timestamp: DateTime<Utc>,
    /// What caused the transition.
    pub detail: EventDetail,
}

impl LifecycleEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        container_id: ContainerId,
        from_state: Option<ContainerState>,
        to_state: Option<ContainerState>,
        detail: EventDetail,
    ) -> Self {
        Self {
            container_id,
            from_state,
            to_state,
            timestamp: Utc::now(),
            detail,
        }
    }

    /// Whether the event reports something an operator should look at.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(
            self.detail,
            EventDetail::LaunchFailed { .. }
                | EventDetail::TerminationTimeout { .. }
                | EventDetail::Reconciled { .. }
        )
    }
}

/// Cause attached to a [`LifecycleEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    /// The container record was created.
    Created,
    /// The workload was launched.
    Started {
        /// Workload pid.
        pid: u32,
    },
    /// The workload could not be launched.
    LaunchFailed {
        /// Error reported by the isolation provider or image resolver.
        message: String,
    },
    /// The workload stopped after the graceful signal.
    Stopped {
        /// Observed exit status.
        exit_code: ExitCode,
    },
    /// The graceful stop deadline expired and the workload was force-killed.
    TerminationTimeout {
        /// Deadline that expired.
        timeout_ms: u64,
        /// Observed exit status after the forced signal.
        exit_code: ExitCode,
    },
    /// The workload terminated on its own.
    Exited {
        /// Observed exit status.
        exit_code: ExitCode,
    },
    /// Restart reconciliation changed the record.
    Reconciled {
        /// Why the record was changed.
        reason: String,
    },
    /// Removal began.
    Removing,
    /// The record was deleted.
    Removed,
}

/// Item delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// A lifecycle event.
    Event(LifecycleEvent),
    /// Events were dropped at this point because the queue was full.
    Overflow {
        /// Number of events dropped.
        dropped: u64,
    },
}

#[derive(Debug)]
struct SubscriberQueue {
    items: Mutex<VecDeque<BusMessage>>,
    notify: Notify,
    closed: AtomicBool,
    detached: AtomicBool,
}

impl SubscriberQueue {
    fn push(&self, event: &LifecycleEvent, capacity: usize) -> bool {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.len() < capacity {
            items.push_back(BusMessage::Event(event.clone()));
            return true;
        }
        match items.back_mut() {
            Some(BusMessage::Overflow { dropped }) => *dropped += 1,
            _ => items.push_back(BusMessage::Overflow { dropped: 1 }),
        }
        false
    }

    fn pop(&self) -> Option<BusMessage> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[derive(Debug)]
struct BusInner {
    subscribers: Mutex<Vec<Arc<SubscriberQueue>>>,
    capacity: usize,
    closed: AtomicBool,
}

/// In-process publish/subscribe of lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus whose subscribers buffer at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Hands `event` to every current subscriber.
    pub fn publish(&self, event: &LifecycleEvent) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.detached.load(Ordering::SeqCst));
        for subscriber in subscribers.iter() {
            if !subscriber.push(event, self.inner.capacity) {
                tracing::warn!(id = %event.container_id, "subscriber queue full, event dropped");
            }
            subscriber.notify.notify_one();
        }
    }

    /// Registers a new subscriber. It sees every event published from now on.
    ///
    /// After [`EventBus::close`] the returned subscription is already finished.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            detached: AtomicBool::new(false),
        });
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.closed.load(Ordering::SeqCst) {
            queue.close();
        } else {
            subscribers.push(Arc::clone(&queue));
        }
        Subscription { queue }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !s.detached.load(Ordering::SeqCst))
            .count()
    }

    /// Ends every subscription once its queue has been drained.
    pub fn close(&self) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.closed.store(true, Ordering::SeqCst);
        for subscriber in subscribers.drain(..) {
            subscriber.close();
        }
    }
}

/// Receiving side of a subscription.
///
/// Dropping it unsubscribes; subscribing again starts a fresh sequence.
#[derive(Debug)]
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Waits for the next message. Returns `None` after the bus is closed
    /// and every buffered message has been delivered.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            if let Some(message) = self.queue.pop() {
                return Some(message);
            }
            if self.queue.closed.load(Ordering::SeqCst) {
                return self.queue.pop();
            }
            self.queue.notify.notified().await;
        }
    }

    /// Returns the next buffered message without waiting.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.queue.pop()
    }

    /// Drains every buffered message without waiting.
    pub fn drain(&mut self) -> Vec<BusMessage> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    /// Turns the subscription into a lazy stream.
    pub fn into_stream(self) -> impl Stream<Item = BusMessage> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|message| (message, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.detached.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn event(n: u32) -> LifecycleEvent {
        LifecycleEvent::new(
            ContainerId::new(format!("c{n}")),
            Some(ContainerState::Created),
            Some(ContainerState::Running),
            EventDetail::Started { pid: n },
        )
    }

    fn pid_of(message: Option<BusMessage>) -> Option<u32> {
        match message {
            Some(BusMessage::Event(LifecycleEvent {
                detail: EventDetail::Started { pid },
                ..
            })) => Some(pid),
            _ => None,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event_in_order() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(&event(1));
        bus.publish(&event(2));

        for sub in [&mut a, &mut b] {
            assert_eq!(pid_of(sub.recv().await), Some(1));
            assert_eq!(pid_of(sub.recv().await), Some(2));
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(8);
        bus.publish(&event(1));
        let mut late = bus.subscribe();
        bus.publish(&event(2));
        assert_eq!(pid_of(late.recv().await), Some(2));
    }

    #[test]
    fn slow_subscriber_overflows_without_affecting_others() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for n in 1..=5 {
            bus.publish(&event(n));
            if let Some(message) = fast.try_recv() {
                assert!(matches!(message, BusMessage::Event(_)));
            }
        }

        let slow_messages = slow.drain();
        assert_eq!(slow_messages.len(), 3);
        assert_eq!(pid_of(Some(slow_messages[0].clone())), Some(1));
        assert_eq!(pid_of(Some(slow_messages[1].clone())), Some(2));
        assert_eq!(slow_messages[2], BusMessage::Overflow { dropped: 3 });

        bus.publish(&event(6));
        assert_eq!(pid_of(slow.try_recv()), Some(6));
    }

    #[test]
    fn dropped_subscription_is_detached() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        bus.publish(&event(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_finishes_streams_after_draining() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        bus.publish(&event(1));
        bus.close();

        let collected: Vec<_> = sub.into_stream().collect().await;
        assert_eq!(collected.len(), 1);

        let mut after = bus.subscribe();
        assert!(after.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe();
        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish(&event(9));
        });
        assert_eq!(pid_of(sub.recv().await), Some(9));
        handle.await.expect("publisher");
    }

    #[test]
    fn warnings_are_flagged() {
        let timeout = LifecycleEvent::new(
            ContainerId::new("c"),
            Some(ContainerState::Running),
            Some(ContainerState::Stopped),
            EventDetail::TerminationTimeout {
                timeout_ms: 5000,
                exit_code: ExitCode::Code(137),
            },
        );
        assert!(timeout.is_warning());
        assert!(!event(1).is_warning());
    }
}
