//! Error types for the package processing engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessError>;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("pairing {pairing}: partition {partition} has 0 items")]
    EmptyPartition { pairing: usize, partition: u32 },

    #[error("corrupt tree: {0}")]
    CorruptTree(String),

    #[error("corrupt package: {0}")]
    CorruptPackage(String),

    #[error("key {0} missing from result tree")]
    KeyMissing(u32),

    #[error("partition {0} not found in package")]
    PartitionNotFound(u32),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("worker thread {0} panicked")]
    WorkerPanic(usize),
}

impl From<bincode::Error> for ProcessError {
    fn from(err: bincode::Error) -> Self {
        ProcessError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(err: serde_json::Error) -> Self {
        ProcessError::Serialization(err.to_string())
    }
}
