use sluice_kafka::producer::{
    KafkaProducer, KafkaProducerConfig, KafkaSinkMessage, abort_lingering_transaction,
    new_producer,
};

use crate::broker::{BrokerProducer, ProducerFactory};
use crate::delivery::DeliveryFuture;
use crate::record::ProducerRecord;
use crate::state::TransactionId;
use crate::{Error, Result};

impl From<ProducerRecord> for KafkaSinkMessage {
    fn from(record: ProducerRecord) -> Self {
        KafkaSinkMessage {
            key: record.key,
            payload: record.payload,
            ..Default::default()
        }
    }
}

impl BrokerProducer for KafkaProducer {
    fn send(&mut self, record: ProducerRecord) -> Result<DeliveryFuture> {
        let delivery = KafkaProducer::send(self, record.into())?;
        Ok(Box::pin(async move {
            delivery
                .await
                .map_err(|e| Error::Delivery(e.to_string()))
        }))
    }

    async fn init_transactions(&mut self) -> Result<()> {
        Ok(KafkaProducer::init_transactions(self).await?)
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        Ok(KafkaProducer::begin_transaction(self).await?)
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        Ok(KafkaProducer::commit_transaction(self).await?)
    }

    async fn abort_transaction(&mut self) -> Result<()> {
        Ok(KafkaProducer::abort_transaction(self).await?)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(KafkaProducer::flush(self).await?)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(KafkaProducer::close(self).await?)
    }
}

impl ProducerFactory for KafkaProducerConfig {
    type Producer = KafkaProducer;

    fn create(&self, transactional_id: Option<&TransactionId>) -> Result<KafkaProducer> {
        Ok(new_producer(
            self,
            transactional_id.map(ToString::to_string),
        )?)
    }

    // Kafka has no notion of an unknown session: initializing an id it never saw
    // registers it, so this never returns `UnknownSession`.
    async fn abort_session(&self, transactional_id: &TransactionId) -> Result<()> {
        abort_lingering_transaction(self, transactional_id.as_str()).await?;
        Ok(())
    }
}
