use sluice_testing::simplebroker::{Record, SimpleBroker, SimpleBrokerError, SimpleProducer};

use crate::broker::{BrokerProducer, ProducerFactory};
use crate::delivery::DeliveryFuture;
use crate::record::ProducerRecord;
use crate::state::TransactionId;
use crate::{Error, Result};

pub const TEST_TOPIC: &str = "sluice-test";

impl From<SimpleBrokerError> for Error {
    fn from(value: SimpleBrokerError) -> Self {
        match value {
            SimpleBrokerError::UnknownSession(id) => Error::UnknownSession(id),
            SimpleBrokerError::Delivery(reason) => Error::Delivery(reason),
            other => Error::Broker(other.to_string()),
        }
    }
}

impl From<ProducerRecord> for Record {
    fn from(record: ProducerRecord) -> Self {
        Record {
            key: record.key,
            payload: record.payload,
            ..Default::default()
        }
    }
}

impl BrokerProducer for SimpleProducer {
    fn send(&mut self, record: ProducerRecord) -> Result<DeliveryFuture> {
        let delivery = SimpleProducer::send(self, record.into())?;
        Ok(Box::pin(async move { Ok(delivery.await?) }))
    }

    async fn init_transactions(&mut self) -> Result<()> {
        Ok(SimpleProducer::init_transactions(self).await?)
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        Ok(SimpleProducer::begin_transaction(self).await?)
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        Ok(SimpleProducer::commit_transaction(self).await?)
    }

    async fn abort_transaction(&mut self) -> Result<()> {
        Ok(SimpleProducer::abort_transaction(self).await?)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(SimpleProducer::flush(self).await?)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(SimpleProducer::close(self).await?)
    }
}

/// Creates [SimpleProducer]s for [TEST_TOPIC].
#[derive(Debug, Clone, Default)]
pub struct SimpleBrokerFactory {
    pub broker: SimpleBroker,
}

impl SimpleBrokerFactory {
    pub fn new(broker: &SimpleBroker) -> Self {
        Self {
            broker: broker.clone(),
        }
    }
}

impl ProducerFactory for SimpleBrokerFactory {
    type Producer = SimpleProducer;

    fn create(&self, transactional_id: Option<&TransactionId>) -> Result<SimpleProducer> {
        Ok(self
            .broker
            .producer(TEST_TOPIC, transactional_id.map(ToString::to_string)))
    }

    async fn abort_session(&self, transactional_id: &TransactionId) -> Result<()> {
        Ok(self.broker.abort_session(transactional_id.as_str()).await?)
    }
}

/// Payloads of `records`, as strings.
pub fn payloads(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| String::from_utf8_lossy(&record.payload).to_string())
        .collect()
}
