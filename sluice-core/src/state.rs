//! Checkpoint artifacts of the sink writer: the [SinkState] stored in the
//! pipeline's checkpoint and the [CommitToken] handed to the coordinator.
//!
//! Both are opaque to the pipeline. The only format that must stay stable across
//! releases is the [TransactionId] encoding, since a new release has to find and
//! abort sessions opened by an old one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identifier of a transactional session at the broker.
///
/// Encoded as `{prefix}-{subtask_index}-{epoch}`, so it is unique per writer
/// instance and epoch and can be derived again after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(prefix: &str, subtask_index: u32, epoch: u64) -> Self {
        Self(format!("{prefix}-{subtask_index}-{epoch}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the id into (prefix, subtask index, epoch). Returns `None` for ids
    /// that were not produced by [TransactionId::new].
    pub fn parts(&self) -> Option<(&str, u32, u64)> {
        let mut parts = self.0.rsplitn(3, '-');
        let epoch = parts.next()?.parse().ok()?;
        let subtask_index = parts.next()?.parse().ok()?;
        let prefix = parts.next().filter(|prefix| !prefix.is_empty())?;
        Some((prefix, subtask_index, epoch))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which produce sender wrote the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStrategy {
    Simple,
    Transactional,
}

/// Recoverable identity of the transaction a sender was running when the
/// checkpoint was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkState {
    pub strategy: DeliveryStrategy,
    pub transactional_id: TransactionId,
    pub epoch: u64,
}

impl SinkState {
    pub fn transactional(transactional_id: TransactionId, epoch: u64) -> Self {
        Self {
            strategy: DeliveryStrategy::Transactional,
            transactional_id,
            epoch,
        }
    }
}

/// Handed to the coordinator once every record of an epoch is acknowledged.
/// Committing it makes the epoch's records visible; never committing it means
/// the epoch is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitToken {
    pub transactional_id: TransactionId,
    pub epoch: u64,
    /// Number of records acknowledged by the broker within the transaction.
    pub record_count: u64,
}

/// Encodes states for the pipeline's checkpoint store.
pub fn encode_states(states: &[SinkState]) -> Result<Vec<u8>> {
    serde_json::to_vec(states).map_err(|e| Error::Serialize(format!("encoding sink states: {e}")))
}

pub fn decode_states(bytes: &[u8]) -> Result<Vec<SinkState>> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Config(format!("sink state is not restorable: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_encoding() {
        let id = TransactionId::new("sluice-orders", 3, 42);
        assert_eq!(id.as_str(), "sluice-orders-3-42");
        assert_eq!(id.parts(), Some(("sluice-orders", 3, 42)));
    }

    #[test]
    fn test_transaction_id_uniqueness() {
        let id = TransactionId::new("p", 0, 1);
        assert_ne!(id, TransactionId::new("p", 1, 1));
        assert_ne!(id, TransactionId::new("p", 0, 2));
        assert_eq!(id, TransactionId::new("p", 0, 1));
    }

    #[test]
    fn test_foreign_transaction_id_has_no_parts() {
        assert_eq!(TransactionId::from("s1").parts(), None);
        assert_eq!(TransactionId::from("-0-1").parts(), None);
        assert_eq!(TransactionId::from("p-x-1").parts(), None);
    }

    #[test]
    fn test_sink_state_layout() {
        let state = SinkState::transactional(TransactionId::new("sluice-job", 0, 7), 7);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(
            json,
            r#"{"strategy":"transactional","transactional_id":"sluice-job-0-7","epoch":7}"#
        );
    }

    #[test]
    fn test_states_encode_decode() {
        let states = vec![
            SinkState::transactional(TransactionId::new("p", 0, 1), 1),
            SinkState::transactional(TransactionId::new("p", 1, 4), 4),
        ];
        let bytes = encode_states(&states).unwrap();
        assert_eq!(decode_states(&bytes).unwrap(), states);
        assert!(decode_states(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_decode_garbage_is_config_error() {
        assert!(matches!(decode_states(b"not json"), Err(Error::Config(_))));
    }

    #[test]
    fn test_commit_token_layout() {
        let token = CommitToken {
            transactional_id: TransactionId::new("p", 2, 5),
            epoch: 5,
            record_count: 10,
        };
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(
            json,
            r#"{"transactional_id":"p-2-5","epoch":5,"record_count":10}"#
        );
        assert_eq!(serde_json::from_str::<CommitToken>(&json).unwrap(), token);
    }
}
