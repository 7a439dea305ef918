//! Sink configuration, built from the flat key/value options the pipeline passes in.
//!
//! | key | |
//! |---|---|
//! | `topic` | required |
//! | `semantics` | `NON`, `AT_LEAST_ONCE` or `EXACTLY_ONCE`, defaults to `NON` |
//! | `transaction.prefix` | prefix of transactional ids, defaults to `sluice-{job_id}` |
//! | `partition.key.field` | row field whose value becomes the record key |
//! | `kafka.bootstrap.servers` | required, comma separated |
//! | `kafka.*` | handed to the producer with the `kafka.` prefix stripped |

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sluice_kafka::producer::KafkaProducerConfig;
use tracing::debug;

use crate::writer::SinkContext;
use crate::{Error, Result};

pub const TOPIC_KEY: &str = "topic";
pub const SEMANTICS_KEY: &str = "semantics";
pub const TRANSACTION_PREFIX_KEY: &str = "transaction.prefix";
pub const PARTITION_KEY_FIELD_KEY: &str = "partition.key.field";
pub const KAFKA_CONFIG_PREFIX: &str = "kafka.";
const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";

/// Delivery guarantee requested for the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Semantics {
    /// Fire and forget, records may be lost or duplicated on failure.
    #[default]
    None,
    AtLeastOnce,
    ExactlyOnce,
}

impl Semantics {
    /// Whether the semantics are served by the transactional sender.
    pub fn is_transactional(self) -> bool {
        !matches!(self, Semantics::None)
    }
}

impl FromStr for Semantics {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "non" | "none" => Ok(Semantics::None),
            "at-least-once" => Ok(Semantics::AtLeastOnce),
            "exactly-once" => Ok(Semantics::ExactlyOnce),
            other => Err(Error::Config(format!(
                "unknown semantics '{other}', expected one of NON, AT_LEAST_ONCE, EXACTLY_ONCE"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub topic: String,
    pub semantics: Semantics,
    pub brokers: Vec<String>,
    pub transaction_prefix: Option<String>,
    pub partition_key_field: Option<String>,
    /// Producer properties with the `kafka.` prefix removed, `bootstrap.servers` excluded.
    pub kafka_properties: HashMap<String, String>,
}

impl TryFrom<HashMap<String, String>> for SinkConfig {
    type Error = Error;

    fn try_from(mut options: HashMap<String, String>) -> Result<Self> {
        let topic = options
            .remove(TOPIC_KEY)
            .filter(|topic| !topic.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("'{TOPIC_KEY}' is required")))?;

        let semantics = match options.remove(SEMANTICS_KEY) {
            Some(semantics) => semantics.parse()?,
            None => Semantics::default(),
        };

        let transaction_prefix = options
            .remove(TRANSACTION_PREFIX_KEY)
            .filter(|prefix| !prefix.is_empty());
        let partition_key_field = options
            .remove(PARTITION_KEY_FIELD_KEY)
            .filter(|field| !field.is_empty());

        let mut kafka_properties = HashMap::new();
        for (key, value) in options {
            match key.strip_prefix(KAFKA_CONFIG_PREFIX) {
                Some(property) if !property.is_empty() => {
                    kafka_properties.insert(property.to_string(), value);
                }
                _ => debug!(key, "Ignoring unknown sink option"),
            }
        }

        let brokers: Vec<String> = kafka_properties
            .remove(BOOTSTRAP_SERVERS)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(String::from)
            .collect();
        if brokers.is_empty() {
            return Err(Error::Config(format!(
                "'{KAFKA_CONFIG_PREFIX}{BOOTSTRAP_SERVERS}' is required"
            )));
        }

        Ok(SinkConfig {
            topic,
            semantics,
            brokers,
            transaction_prefix,
            partition_key_field,
            kafka_properties,
        })
    }
}

impl SinkConfig {
    /// Prefix of the transactional ids of this sink.
    pub fn transaction_prefix(&self, context: &SinkContext) -> String {
        self.transaction_prefix
            .clone()
            .unwrap_or_else(|| format!("sluice-{}", context.job_id))
    }

    pub fn kafka_producer_config(&self) -> KafkaProducerConfig {
        let mut config = KafkaProducerConfig::new(self.brokers.clone(), self.topic.clone());
        config.kafka_raw_config = self.kafka_properties.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_semantics_parsing() {
        assert_eq!("NON".parse::<Semantics>().unwrap(), Semantics::None);
        assert_eq!("none".parse::<Semantics>().unwrap(), Semantics::None);
        assert_eq!(
            "AT_LEAST_ONCE".parse::<Semantics>().unwrap(),
            Semantics::AtLeastOnce
        );
        assert_eq!(
            "exactly-once".parse::<Semantics>().unwrap(),
            Semantics::ExactlyOnce
        );
        assert_eq!(
            " Exactly_Once ".parse::<Semantics>().unwrap(),
            Semantics::ExactlyOnce
        );
        assert!(matches!(
            "twice".parse::<Semantics>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_semantics_sender_selection() {
        assert!(!Semantics::None.is_transactional());
        assert!(Semantics::AtLeastOnce.is_transactional());
        assert!(Semantics::ExactlyOnce.is_transactional());
    }

    #[test]
    fn test_config_from_options() {
        let config = SinkConfig::try_from(options(&[
            ("topic", "orders"),
            ("semantics", "EXACTLY_ONCE"),
            ("transaction.prefix", "orders-sink"),
            ("kafka.bootstrap.servers", "b1:9092, b2:9092"),
            ("kafka.compression.type", "lz4"),
            ("unrelated", "x"),
        ]))
        .unwrap();

        assert_eq!(config.topic, "orders");
        assert_eq!(config.semantics, Semantics::ExactlyOnce);
        assert_eq!(config.brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(config.transaction_prefix.as_deref(), Some("orders-sink"));
        assert_eq!(
            config.kafka_properties,
            options(&[("compression.type", "lz4")])
        );

        let producer_config = config.kafka_producer_config();
        assert_eq!(producer_config.topic, "orders");
        assert_eq!(producer_config.brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(
            producer_config.kafka_raw_config.get("compression.type"),
            Some(&"lz4".to_string())
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = SinkConfig::try_from(options(&[
            ("topic", "orders"),
            ("kafka.bootstrap.servers", "localhost:9092"),
        ]))
        .unwrap();
        assert_eq!(config.semantics, Semantics::None);
        assert_eq!(config.partition_key_field, None);

        let context = SinkContext::new("job-7", 0);
        assert_eq!(config.transaction_prefix(&context), "sluice-job-7");
    }

    #[test]
    fn test_config_missing_required() {
        let missing_topic = SinkConfig::try_from(options(&[(
            "kafka.bootstrap.servers",
            "localhost:9092",
        )]));
        assert!(matches!(missing_topic, Err(Error::Config(_))));

        let missing_brokers = SinkConfig::try_from(options(&[
            ("topic", "orders"),
            ("kafka.bootstrap.servers", " , "),
        ]));
        assert!(matches!(missing_brokers, Err(Error::Config(_))));
    }

    #[test]
    fn test_config_invalid_semantics() {
        let result = SinkConfig::try_from(options(&[
            ("topic", "orders"),
            ("semantics", "sometimes"),
            ("kafka.bootstrap.servers", "localhost:9092"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
