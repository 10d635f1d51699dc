// Wed Jan 14 2026 - Alex

pub mod bridge;
pub mod bus;

pub use bridge::ChangeEventBridge;
pub use bus::{CacheEvent, EventBus, EventHandler, EventKinds, SubscriptionId};
