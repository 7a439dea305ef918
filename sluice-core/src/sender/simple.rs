use tracing::{debug, warn};

use crate::Result;
use crate::broker::BrokerProducer;
use crate::delivery::{self, DeliveryHandle};
use crate::record::ProducerRecord;
use crate::sender::ProduceSender;
use crate::state::{CommitToken, SinkState};

/// Sends records outside of any transaction. Records are visible as soon as the
/// broker acknowledges them; a checkpoint only waits for the acknowledgements.
pub(crate) struct SimpleSender<P> {
    producer: P,
    in_flight: Vec<DeliveryHandle>,
    next_seq: u64,
}

impl<P: BrokerProducer> SimpleSender<P> {
    pub(crate) fn new(producer: P) -> Self {
        Self {
            producer,
            in_flight: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<P: BrokerProducer> ProduceSender for SimpleSender<P> {
    fn send(&mut self, record: ProducerRecord) -> Result<u64> {
        delivery::reap_acked(&mut self.in_flight);

        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = match self.producer.send(record) {
            Ok(pending) => DeliveryHandle::new(seq, pending),
            Err(e) => {
                warn!(?e, seq, "Producer refused record");
                DeliveryHandle::failed(seq, e.to_string())
            }
        };
        self.in_flight.push(handle);
        Ok(seq)
    }

    fn snapshot_state(&self) -> Vec<SinkState> {
        Vec::new()
    }

    async fn prepare_commit(&mut self) -> Result<Option<CommitToken>> {
        self.producer.flush().await?;
        let acked = delivery::resolve_all(std::mem::take(&mut self.in_flight)).await?;
        debug!(acked, "Flushed records");
        Ok(None)
    }

    async fn abort(&mut self) -> Result<()> {
        // sent records cannot be taken back
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.in_flight.clear();
        self.producer.close().await
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use sluice_testing::simplebroker::{SimpleBroker, SimpleProducer};

    use super::*;
    use crate::Error;
    use crate::broker::ProducerFactory;
    use crate::broker::simplebroker::{SimpleBrokerFactory, TEST_TOPIC, payloads};

    fn record(payload: &str) -> ProducerRecord {
        ProducerRecord {
            key: None,
            payload: Bytes::from(payload.to_string()),
        }
    }

    fn sender(broker: &SimpleBroker) -> SimpleSender<SimpleProducer> {
        let producer = SimpleBrokerFactory::new(broker).create(None).unwrap();
        SimpleSender::new(producer)
    }

    #[tokio::test]
    async fn test_send_and_prepare() {
        let broker = SimpleBroker::new();
        let mut sender = sender(&broker);

        assert_eq!(sender.send(record("a")).unwrap(), 0);
        assert_eq!(sender.send(record("b")).unwrap(), 1);
        assert!(sender.snapshot_state().is_empty());
        assert_eq!(sender.prepare_commit().await.unwrap(), None);
        assert!(sender.in_flight.is_empty());

        assert_eq!(payloads(&broker.committed(TEST_TOPIC)), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_acked_deliveries_are_reaped() {
        let broker = SimpleBroker::new();
        let mut sender = sender(&broker);

        for i in 0..5 {
            sender.send(record(&i.to_string())).unwrap();
        }
        // every earlier delivery resolved immediately and was dropped by the last send
        assert_eq!(sender.in_flight.len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_surfaces_delivery_failure() {
        let broker = SimpleBroker::new();
        broker.error_injector().skip_deliveries_then_fail(1, 1);
        let mut sender = sender(&broker);

        sender.send(record("a")).unwrap();
        sender.send(record("b")).unwrap();
        sender.send(record("c")).unwrap();

        let result = sender.prepare_commit().await;
        assert!(matches!(result, Err(Error::Delivery(_))));
        assert_eq!(payloads(&broker.committed(TEST_TOPIC)), vec!["a", "c"]);

        // failures are reported once
        sender.send(record("d")).unwrap();
        assert_eq!(sender.prepare_commit().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_abort_with_no_sends() {
        let broker = SimpleBroker::new();
        let mut sender = sender(&broker);

        sender.abort().await.unwrap();
        sender.send(record("a")).unwrap();
        sender.prepare_commit().await.unwrap();
        assert_eq!(payloads(&broker.committed(TEST_TOPIC)), vec!["a"]);
    }

    #[tokio::test]
    async fn test_close_failure() {
        let broker = SimpleBroker::new();
        broker.error_injector().fail_closes(1);
        let mut sender = sender(&broker);
        assert!(matches!(sender.close().await, Err(Error::Broker(_))));
    }
}
