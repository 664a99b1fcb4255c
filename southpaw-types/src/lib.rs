//! Shared, I/O-free types for the southpaw denormalization engine: the
//! canonical key type, the record trait and its JSON concrete
//! implementation, the relation-tree configuration model, the
//! denormalized-output model, the engine configuration model and the
//! error types every other crate forwards into.

pub mod config;
pub mod denormalized;
pub mod errors;
pub mod key;
pub mod record;
pub mod relation;

pub use config::Config;
pub use denormalized::DenormalizedRecord;
pub use key::{Key, KeySet};
pub use record::{JsonRecord, Record, TransactionMetadata};
pub use relation::Relation;
