use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Delivery Error - {0}")]
    Delivery(String),

    #[error("Recovery Error - aborting {transactional_id}: {reason}")]
    Recovery {
        transactional_id: String,
        reason: String,
    },

    #[error("Close Error - {0}")]
    Close(String),

    #[error("Broker Error - {0}")]
    Broker(String),

    #[error("Unknown Session - {0}")]
    UnknownSession(String),

    #[error("State Error - {0}")]
    State(String),

    #[error("Serialize Error - {0}")]
    Serialize(String),
}

impl From<sluice_kafka::Error> for Error {
    fn from(value: sluice_kafka::Error) -> Self {
        Error::Broker(value.to_string())
    }
}
