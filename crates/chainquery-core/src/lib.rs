//! chainquery-core: foundation for the ordered, resumable chain-tailing pipeline.
//!
//! # Architecture
//!
//! ```text
//! QueryService → BlockProducer ──(QueryEventBlock stream)──→ MappingsProcessor → Store
//!                    ├── Backoff          (retry delays for failed block fetches)
//!                    └── ProducerConfig   (timeouts, backoff bounds, head polling)
//!                                                 ├── HandlerRegistry   (processing pack dispatch)
//!                                                 ├── PersistenceContext (per-block write buffer)
//!                                                 └── CheckpointManager  (resume position)
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod height;
pub mod service;
pub mod store;
pub mod types;

pub use backoff::Backoff;
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use config::ProducerConfig;
pub use context::PersistenceContext;
pub use error::{IndexerError, QueryError};
pub use handler::{EventHandler, HandlerRegistry, ProcessingPack};
pub use height::{BlockHeight, EventIndex};
pub use service::{HeaderStream, QueryService};
pub use store::{EntityWrite, Store, StoreConnector, WriteBatch};
pub use types::{
    EventRecord, Extrinsic, Hash, Header, Phase, QueryEvent, QueryEventBlock, RawEvent,
    SignedBlock,
};
