//! chainquery-producer: turns a chain node into an ordered stream of event batches.

pub mod cursor;
pub mod fetcher;
pub mod producer;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use cursor::CursorState;
pub use fetcher::{BlockFetcher, FetchedBlock};
pub use producer::{BlockProducer, ProducerStatus};
