//! Seam between the senders and the message broker.
//!
//! A [BrokerProducer] is bound to the sink's topic and, when created with a
//! transactional id, follows the Kafka transaction lifecycle: `init_transactions`
//! once, then `begin_transaction` and `commit_transaction`/`abort_transaction`
//! for every transaction.

use std::future::Future;

use crate::Result;
use crate::delivery::DeliveryFuture;
use crate::record::ProducerRecord;
use crate::state::TransactionId;

/// Kafka producers built from [sluice_kafka].
#[path = "broker/kafka.rs"]
mod kafka;

/// In-memory broker used by the tests.
#[cfg(any(test, feature = "test-utils"))]
#[path = "broker/simplebroker.rs"]
pub mod simplebroker;

#[trait_variant::make(BrokerProducer: Send)]
#[allow(dead_code)]
pub trait LocalBrokerProducer {
    /// Enqueues the record without waiting for the broker.
    fn send(&mut self, record: ProducerRecord) -> Result<DeliveryFuture>;

    /// Registers the transactional id with the broker, fencing any older
    /// producer with the same id and aborting the transaction it left open.
    async fn init_transactions(&mut self) -> Result<()>;

    async fn begin_transaction(&mut self) -> Result<()>;

    async fn commit_transaction(&mut self) -> Result<()>;

    async fn abort_transaction(&mut self) -> Result<()>;

    /// Waits until every enqueued record was handed to the broker.
    async fn flush(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Creates producers for the sink's topic and aborts sessions by id.
pub trait ProducerFactory: Send + Sync + 'static {
    type Producer: BrokerProducer + 'static;

    /// Creates a producer, transactional when `transactional_id` is set.
    fn create(&self, transactional_id: Option<&TransactionId>) -> Result<Self::Producer>;

    /// Aborts whatever transaction is open under `transactional_id`.
    ///
    /// Returns [crate::Error::UnknownSession] when the broker does not know the id.
    fn abort_session(
        &self,
        transactional_id: &TransactionId,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Closes a producer that is being given up on. Failures are only logged.
pub(crate) async fn discard<P: BrokerProducer>(
    mut producer: P,
    transactional_id: Option<&TransactionId>,
) {
    if let Err(e) = producer.close().await {
        tracing::warn!(?e, ?transactional_id, "Failed to close producer");
    }
}
