use thiserror::Error;

/// Type-erased cause for errors crossing an external-collaborator boundary
/// (serializer, connector), matching the teacher's `BoxedError` convention
/// used to avoid leaking every connector's concrete error type into the
/// engine's own error enums.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration errors (spec §7): surfaced before the driver starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("relation `{0}` is missing a required DenormalizedName on its root")]
    MissingDenormalizedName(String),
    #[error("root relation `{0}` must not declare JoinKey/ParentKey")]
    RootHasJoinKeys(String),
    #[error("non-root relation `{0}` must declare a DenormalizedName only on the root")]
    NonRootHasDenormalizedName(String),
    #[error("child relation `{0}` is missing JoinKey and/or ParentKey")]
    ChildMissingJoinKeys(String),
    #[error("relation tree exceeds maximum depth of {0}")]
    RelationTreeTooDeep(usize),
    #[error("failed to parse relations file at `{0}`: {1}")]
    RelationsFileParse(String, #[source] serde_json::Error),
    #[error("failed to parse config file at `{0}`: {1}")]
    ConfigFileParse(String, #[source] serde_yaml::Error),
    #[error("failed to read `{0}`: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("missing required option `{0}`")]
    MissingOption(&'static str),
}

/// Field-type errors (spec glossary: well-typed field access failures).
#[derive(Error, Debug)]
pub enum TypeError {
    #[error("field `{0}` is not present on the record")]
    FieldNotFound(String),
    #[error("field `{0}` has unexpected type, expected {1}")]
    UnexpectedType(String, &'static str),
}
