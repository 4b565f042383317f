pub mod blocking;
pub mod classifier;
pub mod clustering;
pub mod dedup;
pub mod deduplicator;
pub mod dto;
pub mod error;
pub mod features;
pub mod learner;
pub mod metrics;
pub mod oracle;
pub mod response;
pub mod rules;
pub mod set_cover;
pub mod util;

pub use deduplicator::Deduplicator;
pub use dto::{DedupConfig, Table};
pub use error::DedupError;
