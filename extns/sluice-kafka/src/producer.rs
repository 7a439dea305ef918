use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use rdkafka::ClientConfig;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::error::KafkaResult;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, info};

use crate::{Error, Result};

/// Broker-side timeout after which an unfinished transaction is aborted.
const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the blocking librdkafka calls (init, commit, abort, flush).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaProducerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    /// Raw librdkafka properties. They are applied after the defaults and win over them.
    /// Eg:
    ///  queue.buffering.max.ms: 10
    ///  transaction.timeout.ms: 10000
    pub kafka_raw_config: HashMap<String, String>,
    pub operation_timeout: Duration,
}

impl KafkaProducerConfig {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            kafka_raw_config: HashMap::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    fn client_config(&self, transactional_id: Option<&str>) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("message.timeout.ms", "5000")
            .set("client.id", "sluice-kafka-sink")
            .set_log_level(RDKafkaLogLevel::Warning);

        if let Some(transactional_id) = transactional_id {
            client_config
                .set("transactional.id", transactional_id)
                .set(
                    "transaction.timeout.ms",
                    DEFAULT_TRANSACTION_TIMEOUT.as_millis().to_string(),
                );
        }

        for (key, value) in &self.kafka_raw_config {
            client_config.set(key, value);
        }
        client_config
    }
}

/// A single record bound for the configured topic.
#[derive(Debug, Clone, Default)]
pub struct KafkaSinkMessage {
    pub key: Option<Bytes>,
    pub headers: HashMap<String, String>,
    pub payload: Bytes,
}

pub struct KafkaProducer {
    topic: String,
    producer: FutureProducer,
    transactional_id: Option<String>,
    operation_timeout: Duration,
}

/// Creates a producer for `config.topic`. The producer is transactional when
/// `transactional_id` is set; `init_transactions` still has to be called before
/// the first transaction.
pub fn new_producer(
    config: &KafkaProducerConfig,
    transactional_id: Option<String>,
) -> Result<KafkaProducer> {
    let producer: FutureProducer = config
        .client_config(transactional_id.as_deref())
        .create()
        .map_err(|e| Error::Kafka(format!("Failed to create producer: {}", e)))?;

    Ok(KafkaProducer {
        topic: config.topic.clone(),
        producer,
        transactional_id,
        operation_timeout: config.operation_timeout,
    })
}

/// Aborts whatever transaction a previous owner of `transactional_id` left open.
///
/// Kafka has no "abort by id" request. Initializing transactions with the same id
/// bumps the producer epoch, which fences the old producer and makes the
/// coordinator abort its incomplete transaction. An id the broker has never seen
/// is simply registered, so this is idempotent.
pub async fn abort_lingering_transaction(
    config: &KafkaProducerConfig,
    transactional_id: &str,
) -> Result<()> {
    let producer = new_producer(config, Some(transactional_id.to_string()))?;
    producer.init_transactions().await?;
    info!(transactional_id, "Aborted lingering Kafka transaction");
    producer.close().await
}

impl KafkaProducer {
    /// Enqueues the message in the producer's queue without waiting for the broker.
    /// The returned future resolves once the broker acknowledged (or rejected) it.
    pub fn send(
        &self,
        message: KafkaSinkMessage,
    ) -> Result<impl Future<Output = Result<()>> + Send + 'static> {
        let KafkaSinkMessage {
            key,
            headers: inp_headers,
            payload,
        } = message;

        let mut headers = OwnedHeaders::new();
        for (key, value) in &inp_headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value),
            });
        }

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&self.topic)
            .headers(headers)
            .payload(payload.as_ref());
        if let Some(ref key) = key {
            record = record.key(key.as_ref());
        }

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| Error::Kafka(format!("Enqueueing payload to kafka: {e:?}")))?;

        Ok(async move {
            match delivery.await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err((e, _))) => {
                    tracing::error!(?e, "Sending payload to Kafka topic");
                    Err(Error::Kafka(format!("Sending payload to kafka: {e:?}")))
                }
                Err(_) => Err(Error::Other(
                    "Delivery was cancelled before the broker answered".to_string(),
                )),
            }
        })
    }

    pub async fn init_transactions(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.operation_timeout;
        run_blocking("init_transactions", move || {
            producer.init_transactions(timeout)
        })
        .await
    }

    pub async fn begin_transaction(&self) -> Result<()> {
        let producer = self.producer.clone();
        run_blocking("begin_transaction", move || producer.begin_transaction()).await
    }

    pub async fn commit_transaction(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.operation_timeout;
        run_blocking("commit_transaction", move || {
            producer.commit_transaction(timeout)
        })
        .await
    }

    pub async fn abort_transaction(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.operation_timeout;
        run_blocking("abort_transaction", move || {
            producer.abort_transaction(timeout)
        })
        .await
    }

    pub async fn flush(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.operation_timeout;
        run_blocking("flush", move || producer.flush(timeout)).await
    }

    /// Flushes outstanding messages. The librdkafka handle is released when the
    /// last clone of the producer is dropped.
    pub async fn close(&self) -> Result<()> {
        debug!(transactional_id = ?self.transactional_id, "Closing Kafka producer");
        self.flush().await
    }
}

/// librdkafka's transactional API blocks the calling thread, keep it off the runtime workers.
async fn run_blocking<F>(operation: &'static str, f: F) -> Result<()>
where
    F: FnOnce() -> KafkaResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("{operation} task failed: {e}")))?
        .map_err(|e| Error::Kafka(format!("{operation}: {e}")))
}

/// Helpers for tests that run against a local Kafka broker.
#[cfg(feature = "kafka-tests")]
pub mod test_utils {
    use std::time::Duration;

    use rdkafka::ClientConfig;
    use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::message::Message;
    use tokio::time::timeout;
    use uuid::Uuid;

    pub async fn setup_test_topic() -> String {
        let topic_name = format!(
            "sluice_sink_test_topic_{}",
            Uuid::new_v4().to_string().replace("-", "")
        );

        let admin_client = ClientConfig::new()
            .set("bootstrap.servers", "localhost:9092")
            .create::<AdminClient<_>>()
            .expect("Failed to create admin client");

        let topic_config = NewTopic::new(topic_name.as_str(), 1, TopicReplication::Fixed(1));
        let _ = admin_client
            .create_topics(&[topic_config], &AdminOptions::new())
            .await
            .expect("Failed to create topic");

        topic_name
    }

    /// Reads payloads with `read_committed` isolation until `wait` passes without a message.
    pub async fn consume_committed(topic_name: &str, wait: Duration) -> Vec<String> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", "localhost:9092")
            .set("group.id", format!("test-consumer-{}", Uuid::new_v4()))
            .set("auto.offset.reset", "earliest")
            .set("isolation.level", "read_committed")
            .create()
            .expect("Failed to create consumer");
        consumer
            .subscribe(&[topic_name])
            .expect("Failed to subscribe");

        let mut payloads = Vec::new();
        while let Ok(msg) = timeout(wait, consumer.recv()).await {
            let msg = msg.expect("Kafka error");
            let payload = msg.payload().unwrap_or_default();
            payloads.push(String::from_utf8_lossy(payload).to_string());
        }
        payloads
    }
}
