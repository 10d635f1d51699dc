// Tue Jan 13 2026 - Alex

pub mod snapshot;
pub mod store;

pub use snapshot::{CacheSnapshot, Envelope, IdMap, IdSet, TimePeriod};
pub use store::{CacheStore, ProcedureEntry};
