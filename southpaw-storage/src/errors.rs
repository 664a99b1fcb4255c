use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("keyspace `{0}` is not open")]
    KeySpaceNotOpen(String),
    #[error("lmdb error: {0}")]
    Lmdb(#[from] lmdb::Error),
    #[error("io error at `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("the state store has been closed")]
    Closed,
    #[error("no backup is present to restore from")]
    NoBackup,
}
