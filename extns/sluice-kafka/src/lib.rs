//! Kafka producer plumbing for the sluice sink writer.
//!
//! This crate knows nothing about checkpoints or sink states. It exposes a thin
//! wrapper over an `rdkafka` [FutureProducer](rdkafka::producer::FutureProducer)
//! with non-blocking sends and the transactional calls the sink writer drives.

pub mod producer;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Kafka - {0}")]
    Kafka(String),

    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}
