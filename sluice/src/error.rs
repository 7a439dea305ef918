use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error(transparent)]
    Sink(#[from] sluice_core::Error),

    #[error("State Store Error - {0}")]
    StateStore(String),

    #[error("Input Error - {0}")]
    Input(String),

    #[error("Commit Error - {0}")]
    Commit(String),
}
