//! Simple broker implementation for testing.
//!
//! This module provides an in-memory broker with Kafka-like transactional
//! semantics so the sink writer's commit, abort and recovery paths can be tested
//! without a running Kafka cluster.
//!
//! # Features
//! - Topics as ordered record logs with `read_committed`/`read_uncommitted` views
//! - Transactional sessions with producer epochs and fencing
//! - Session aborts by transactional id, with a log of every request
//! - Error injection for deliveries, commits, aborts and closes
//!
//! # Example
//! ```ignore
//! use sluice_testing::simplebroker::SimpleBroker;
//!
//! let broker = SimpleBroker::new();
//! let mut producer = broker.producer("orders", Some("sluice-job-0-1".to_string()));
//! ```

/// Broker state and record types.
mod broker;
/// Error types.
mod error;
/// Error injector for testing.
mod error_injector;
/// Producer implementation.
mod producer;

// Re-exports
pub use broker::Record;
pub use error::{Result, SimpleBrokerError};
pub use error_injector::ErrorInjector;
pub use producer::SimpleProducer;

use std::sync::Arc;

use parking_lot::RwLock;

use broker::{BrokerState, Visibility};

/// In-memory transactional broker.
///
/// Clones share the same state, so a test can keep one handle for assertions
/// while the code under test creates producers from another.
#[derive(Debug, Clone, Default)]
pub struct SimpleBroker {
    state: Arc<RwLock<BrokerState>>,
    error_injector: Arc<ErrorInjector>,
}

impl SimpleBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the error injector for this broker.
    pub fn error_injector(&self) -> &Arc<ErrorInjector> {
        &self.error_injector
    }

    /// Create a producer for `topic`, transactional when `transactional_id` is set.
    pub fn producer(&self, topic: &str, transactional_id: Option<String>) -> SimpleProducer {
        SimpleProducer {
            state: Arc::clone(&self.state),
            error_injector: Arc::clone(&self.error_injector),
            topic: topic.to_string(),
            transactional_id,
            producer_epoch: None,
            in_transaction: false,
            closed: false,
        }
    }

    /// Aborts the open transaction of a session and fences its producer.
    ///
    /// Returns [SimpleBrokerError::UnknownSession] if the broker has never seen the
    /// id or the session expired.
    pub async fn abort_session(&self, transactional_id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.abort_requests.push(transactional_id.to_string());
        if self.error_injector.should_fail_session_abort() {
            return Err(SimpleBrokerError::Abort(
                "injected session abort failure".to_string(),
            ));
        }
        if !state.sessions.contains_key(transactional_id) {
            return Err(SimpleBrokerError::UnknownSession(
                transactional_id.to_string(),
            ));
        }
        state.init_session(transactional_id);
        Ok(())
    }

    /// Forgets a session the way a broker does once the transaction timeout passed.
    /// Its open transaction is aborted.
    pub fn expire_session(&self, transactional_id: &str) {
        let mut state = self.state.write();
        state.resolve(transactional_id, None, Visibility::Aborted);
        state.sessions.remove(transactional_id);
    }

    /// Records visible to a `read_committed` consumer.
    pub fn committed(&self, topic: &str) -> Vec<Record> {
        self.state.read().records(topic, false)
    }

    /// Records visible to a `read_uncommitted` consumer.
    pub fn uncommitted(&self, topic: &str) -> Vec<Record> {
        self.state.read().records(topic, true)
    }

    /// Every session abort requested so far, in order.
    pub fn abort_requests(&self) -> Vec<String> {
        self.state.read().abort_requests.clone()
    }

    /// Ids of sessions with an open transaction, sorted.
    pub fn ongoing_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .read()
            .sessions
            .iter()
            .filter(|(_, session)| session.ongoing)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Whether the broker knows the session.
    pub fn has_session(&self, transactional_id: &str) -> bool {
        self.state.read().sessions.contains_key(transactional_id)
    }
}
