//! Error types for the simple broker.

use thiserror::Error;

/// Result type for simple broker operations.
pub type Result<T> = std::result::Result<T, SimpleBrokerError>;

/// Errors specific to the simple broker implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimpleBrokerError {
    #[error("Unknown transactional session: {0}")]
    UnknownSession(String),

    #[error("Producer fenced by a newer instance: {0}")]
    Fenced(String),

    #[error("Invalid producer state: {0}")]
    State(String),

    #[error("Failed to deliver record: {0}")]
    Delivery(String),

    #[error("Failed to commit transaction: {0}")]
    Commit(String),

    #[error("Failed to abort transaction: {0}")]
    Abort(String),

    #[error("Failed to close producer: {0}")]
    Close(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", SimpleBrokerError::UnknownSession("s1".to_string())),
            "Unknown transactional session: s1"
        );
        assert_eq!(
            format!("{}", SimpleBrokerError::Fenced("s1".to_string())),
            "Producer fenced by a newer instance: s1"
        );
        assert_eq!(
            format!("{}", SimpleBrokerError::Delivery("injected".to_string())),
            "Failed to deliver record: injected"
        );
        assert_eq!(
            format!("{}", SimpleBrokerError::Close("injected".to_string())),
            "Failed to close producer: injected"
        );
    }
}
