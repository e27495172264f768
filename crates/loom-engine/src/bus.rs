use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use loom_core::events::SessionEvent;
use loom_core::ids::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    session: Option<SessionId>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Receiving end of a subscription. Dropping it is equivalent to unsubscribing;
/// the bus prunes the closed channel on the next publish.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything already published to this subscription.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// In-process event fan-out. Publishing never blocks and never fails:
/// with no matching subscriber the event is dropped.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for every session.
    pub fn subscribe(&self) -> Subscription {
        self.add(None)
    }

    pub fn subscribe_session(&self, session_id: SessionId) -> Subscription {
        self.add(Some(session_id))
    }

    fn add(&self, session: Option<SessionId>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, Subscriber { session, tx });
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&self, event: SessionEvent) {
        let mut delivered = 0usize;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if sub.session.as_ref().is_some_and(|s| s != event.session_id()) {
                continue;
            }
            if sub.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
        }

        if delivered == 0 {
            warn!(event_type = event.event_type(), "no event subscribers, event dropped");
        } else {
            trace!(event_type = event.event_type(), delivered, "event published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(session: &SessionId, text: &str) -> SessionEvent {
        SessionEvent::Content {
            session_id: session.clone(),
            text: text.into(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(content(&SessionId::new(), "lost"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn delivers_in_publish_order() {
        let bus = EventBus::new();
        let sid = SessionId::new();
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(content(&sid, &i.to_string()));
        }
        let texts: Vec<String> = sub
            .drain()
            .into_iter()
            .map(|e| match e {
                SessionEvent::Content { text, .. } => text,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(texts, ["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let sid = SessionId::new();
        let mut sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
        bus.publish(content(&sid, "after"));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn session_filter() {
        let bus = EventBus::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let mut only_a = bus.subscribe_session(a.clone());
        let mut all = bus.subscribe();

        bus.publish(content(&a, "for a"));
        bus.publish(content(&b, "for b"));

        assert_eq!(only_a.drain().len(), 1);
        assert_eq!(all.drain().len(), 2);
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.publish(content(&SessionId::new(), "x"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn recv_awaits_next_event() {
        let bus = std::sync::Arc::new(EventBus::new());
        let sid = SessionId::new();
        let mut sub = bus.subscribe_session(sid.clone());

        let publisher = std::sync::Arc::clone(&bus);
        tokio::spawn(async move {
            publisher.publish(content(&sid, "late"));
        });

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type(), "content");
    }
}
