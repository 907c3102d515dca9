mod content_fetcher;
mod tldr;

pub use content_fetcher::{ContentFetcher, ContentSource};
pub use tldr::{SummaryOutcome, TldrService};
