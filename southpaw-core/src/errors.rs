use thiserror::Error;

use southpaw_storage::errors::StorageError;
use southpaw_types::errors::{BoxedError, ConfigError, TypeError};

/// Error surface of the driver loop (spec §7). `Violation` is fatal and is
/// never locally recovered; `Io`/`Storage` propagate whatever the external
/// collaborator raised so the driver can terminate leaving durable state at
/// the last commit point.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    Storage(#[from] StorageError),

    #[error("record field error: {0}")]
    Field(#[from] TypeError),

    #[error("stream i/o error on `{stream}`: {source}")]
    Stream {
        stream: String,
        #[source]
        source: BoxedError,
    },

    #[error("protocol invariant violated: {0}")]
    Violation(String),
}
