//! The denormalization engine: merge-by-time scheduling, absorb/emit, the
//! reversible-index registry, durability cadence, and metrics (spec §3-§9).
//! `southpaw-types` and `southpaw-storage` hold the I/O-free data model and
//! the embedded state store respectively; this crate is where they meet the
//! stream client interfaces and get driven by the `Engine` loop.

pub mod absorb;
pub mod durability;
pub mod emit;
pub mod engine;
pub mod errors;
pub mod fields;
pub mod index;
pub mod metrics;
pub mod root;
pub mod scheduler;
pub mod stream;

pub use durability::DurabilityController;
pub use engine::Engine;
pub use errors::ExecutionError;
pub use index::Indices;
pub use metrics::Metrics;
pub use root::RootHandle;
pub use scheduler::{Scheduler, TRANSACTIONS_ENTITY};
pub use stream::{
    parse_transaction_envelope, ConsumerRecord, DataCollectionCount, MemorySinkHandle, MemorySourceHandle,
    MemoryStreamHub, StreamSink, StreamSource, TransactionEnvelope,
};

#[cfg(feature = "kafka")]
pub use stream::{KafkaStreamSink, KafkaStreamSource};
