//! Fans inbound event frames out to subscribers. A subscription is a
//! bounded inbox; a slow consumer loses its oldest buffered event rather
//! than ever blocking the session that produced it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tokio::sync::Notify;

use crate::session::InboundEvent;

/// An event as delivered to a subscriber: the inbound frame augmented with
/// the fields the dispatcher alone is responsible for attaching.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    pub server_id: String,
    pub op: String,
    pub data: Value,
    pub received_at: std::time::SystemTime,
}

impl From<InboundEvent> for DispatchedEvent {
    fn from(event: InboundEvent) -> Self {
        Self {
            server_id: event.server_id,
            op: event.op,
            data: event.data,
            received_at: event.received_at,
        }
    }
}

pub type EventFilter = Arc<dyn Fn(&DispatchedEvent) -> bool + Send + Sync>;

/// A bounded, drop-oldest-on-full queue with an async `recv`. Plain
/// `tokio::sync::mpsc` can't express drop-oldest on the producer side
/// (`try_send` only ever rejects the newest item), so each subscriber gets
/// one of these instead.
struct RingInbox {
    queue: Mutex<VecDeque<DispatchedEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl RingInbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: DispatchedEvent) {
        {
            let mut queue = self.queue.lock().expect("dispatcher inbox poisoned");
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    async fn recv(&self) -> DispatchedEvent {
        loop {
            if let Some(event) = self.queue.lock().expect("dispatcher inbox poisoned").pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    fn try_recv(&self) -> Option<DispatchedEvent> {
        self.queue.lock().expect("dispatcher inbox poisoned").pop_front()
    }
}

struct Subscription {
    op_prefixes: Vec<String>,
    filter: Option<EventFilter>,
    inbox: Arc<RingInbox>,
}

impl Subscription {
    fn matches(&self, event: &DispatchedEvent) -> bool {
        let op_matches = self
            .op_prefixes
            .iter()
            .any(|prefix| event.op == *prefix || event.op.starts_with(&format!("{prefix}.")));
        if !op_matches {
            return false;
        }
        match &self.filter {
            Some(filter) => filter(event),
            None => true,
        }
    }
}

/// A handle returned from [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

pub struct Subscriber {
    pub id: SubscriptionId,
    inbox: Arc<RingInbox>,
}

impl Subscriber {
    pub async fn recv(&mut self) -> DispatchedEvent {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DispatchedEvent> {
        self.inbox.try_recv()
    }

    /// Count of events dropped from this subscriber's inbox because it
    /// fell behind. Monotonically increasing.
    pub fn dropped_count(&self) -> u64 {
        self.inbox.dropped.load(Ordering::Relaxed)
    }
}

pub struct EventDispatcher {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicUsize,
    inbox_capacity: usize,
}

impl EventDispatcher {
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            inbox_capacity: inbox_capacity.max(1),
        }
    }

    pub fn subscribe(&self, op_prefixes: Vec<String>, filter: Option<EventFilter>) -> Subscriber {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) as u64);
        let inbox = Arc::new(RingInbox::new(self.inbox_capacity));
        self.subscriptions.write().expect("dispatcher lock poisoned").insert(
            id,
            Subscription {
                op_prefixes,
                filter,
                inbox: inbox.clone(),
            },
        );
        Subscriber { id, inbox }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.write().expect("dispatcher lock poisoned").remove(&id);
    }

    /// Delivers `event` to every matching subscription. Non-blocking: a
    /// full inbox has its oldest entry evicted to make room, rather than
    /// ever making the caller (ultimately, a session's run loop) wait.
    pub fn dispatch(&self, event: DispatchedEvent) {
        let subscriptions = self.subscriptions.read().expect("dispatcher lock poisoned");
        for subscription in subscriptions.values() {
            if subscription.matches(&event) {
                subscription.inbox.push(event.clone());
            }
        }
    }

    /// Runs until `events` closes, dispatching each inbound event in
    /// arrival order. Intended to be spawned once per process, fed by
    /// every session's `InboundEvent` sender.
    pub async fn run(self: Arc<Self>, mut events: tokio::sync::mpsc::UnboundedReceiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event.into());
        }
    }
}
