mod summarizer;

pub use summarizer::{system_prompt, Summarize, Summarizer};
