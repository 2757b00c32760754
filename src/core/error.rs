use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HnpError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("YAML parse error: {0}")]
    YamlInvalid(String),
    #[error("not a fabric resource: {0}")]
    NotFabricResource(String),
    #[error("directory contract broken: {0}")]
    StructureMissing(String),
    #[error("sync already in progress: {0}")]
    LockContention(String),
    #[error("remote provider unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("persistence collaborator rejected resource: {0}")]
    PersistenceFailed(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("not found: {0}")]
    NotFound(String),
}
