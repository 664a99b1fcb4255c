use thiserror::Error;

use southpaw_core::ExecutionError;
use southpaw_storage::errors::StorageError;
use southpaw_types::errors::ConfigError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("relations file `{0}` declares no root relations")]
    NoRelations(String),
    #[error("the `kafka` feature is required to run against live streams; build with `--features kafka` or pass `--build` for a dry run")]
    KafkaFeatureDisabled,
}
