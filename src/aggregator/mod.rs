//! Message aggregation: the deduplicating buffer and the paging rate window
pub mod buffer;
pub mod rate_window;

pub use buffer::{FlushOutcome, MessageBuffer, OccurrenceStats};
pub use rate_window::RateWindow;
