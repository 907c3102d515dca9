mod article;
mod cache_mode;
mod payload;
mod tldr;

pub use article::{Article, Issue, ReadState};
pub use cache_mode::CacheMode;
pub use payload::{DailyPayload, DayScrape};
pub use tldr::{Effort, TldrState, TLDR_LEASE_SECS};
