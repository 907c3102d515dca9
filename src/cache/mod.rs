//! Cache layers over [`Storage`](crate::storage::Storage): the global mode
//! gate, the raw day cache, the removed-URL list and the per-date payloads.

mod day;
mod mode;
mod payload;
mod removed;

pub use day::{DayCache, DayFetch, Provenance, SourceStats};
pub use mode::CacheModeController;
pub use payload::PayloadStore;
pub use removed::{AddOutcome, RemovedUrlStore};
