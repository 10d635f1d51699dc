// Wed Jan 14 2026 - Alex

use bitflags::bitflags;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventKinds: u8 {
        const SENSOR_INSERTION = 1 << 0;
        const SENSOR_DELETION = 1 << 1;
        const OBSERVATION_INSERTION = 1 << 2;
        const OBSERVATION_DELETION = 1 << 3;
        const RESULT_TEMPLATE_INSERTION = 1 << 4;
        const CACHE_MUTATIONS = Self::SENSOR_INSERTION.bits()
            | Self::SENSOR_DELETION.bits()
            | Self::OBSERVATION_INSERTION.bits()
            | Self::OBSERVATION_DELETION.bits()
            | Self::RESULT_TEMPLATE_INSERTION.bits();
    }
}

/// Domain mutation that has already been committed to the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    SensorInsertion { procedure: String },
    SensorDeletion { procedure: String },
    ObservationInsertion { observation: String, procedure: String },
    ObservationDeletion { observation: String, procedure: String },
    ResultTemplateInsertion { identifier: String },
}

impl CacheEvent {
    pub fn kind(&self) -> EventKinds {
        match self {
            CacheEvent::SensorInsertion { .. } => EventKinds::SENSOR_INSERTION,
            CacheEvent::SensorDeletion { .. } => EventKinds::SENSOR_DELETION,
            CacheEvent::ObservationInsertion { .. } => EventKinds::OBSERVATION_INSERTION,
            CacheEvent::ObservationDeletion { .. } => EventKinds::OBSERVATION_DELETION,
            CacheEvent::ResultTemplateInsertion { .. } => EventKinds::RESULT_TEMPLATE_INSERTION,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::SensorInsertion { .. } => "sensor_insertion",
            CacheEvent::SensorDeletion { .. } => "sensor_deletion",
            CacheEvent::ObservationInsertion { .. } => "observation_insertion",
            CacheEvent::ObservationDeletion { .. } => "observation_deletion",
            CacheEvent::ResultTemplateInsertion { .. } => "result_template_insertion",
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kinds: EventKinds,
    handler: EventHandler,
}

pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, kinds: EventKinds, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.write().push(Subscription { id, kinds, handler });
        log::debug!("Event subscription {:?} registered for {:?}", id, kinds);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Delivers `event` to every matching handler and returns how many ran.
    ///
    /// Handlers run outside the subscription lock; a panicking handler is
    /// logged and never reaches the publisher.
    pub fn publish(&self, event: CacheEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kinds.intersects(kind))
            .map(|s| s.handler.clone())
            .collect();

        for handler in &handlers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                log::error!(
                    "Event handler for {} panicked: {}",
                    event.name(),
                    crate::error::panic_message(payload)
                );
            }
        }

        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
