//! chainquery-processor: applies a processing pack to an ordered stream of event batches.

pub mod processor;

pub use processor::{MappingsProcessor, ProcessingStats};
