//! Durable embedded key-value state store and the reversible foreign-key
//! index built on top of it (spec §4.1 and §6).

pub mod errors;
pub mod index;
pub mod store;

pub use index::{ReversibleIndex, Violation};
pub use store::{KeySpace, LmdbStateStore, StateStore, METADATA_KEYSPACE};

pub use lmdb;
