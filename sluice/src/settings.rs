use std::collections::HashMap;
use std::path::PathBuf;

use sluice_core::config::{
    KAFKA_CONFIG_PREFIX, PARTITION_KEY_FIELD_KEY, SEMANTICS_KEY, TOPIC_KEY,
    TRANSACTION_PREFIX_KEY,
};
use sluice_core::{RowType, SinkConfig, SinkContext};

use crate::error::{Error, Result};

const ENV_PREFIX: &str = "SLUICE_";
const ENV_KAFKA_PREFIX: &str = "SLUICE_KAFKA_";
const ENV_JOB_ID: &str = "SLUICE_JOB_ID";
const ENV_SUBTASK_INDEX: &str = "SLUICE_SUBTASK_INDEX";
const ENV_CHECKPOINT_RECORDS: &str = "SLUICE_CHECKPOINT_RECORDS";
const ENV_FIELDS: &str = "SLUICE_FIELDS";
const ENV_STATE_PATH: &str = "SLUICE_STATE_PATH";

const DEFAULT_JOB_ID: &str = "sluice";
const DEFAULT_CHECKPOINT_RECORDS: usize = 1000;
const DEFAULT_FIELDS: &str = "value";
const DEFAULT_STATE_PATH: &str = "sluice-state.json";

/// Everything the driver needs, read from `SLUICE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub(crate) sink: SinkConfig,
    pub(crate) context: SinkContext,
    pub(crate) row_type: RowType,
    /// Rows per checkpoint.
    pub(crate) checkpoint_records: usize,
    pub(crate) state_path: PathBuf,
}

/// Maps the environment onto sink options: `SLUICE_TOPIC` becomes `topic`,
/// `SLUICE_KAFKA_BOOTSTRAP_SERVERS` becomes `kafka.bootstrap.servers`.
fn sink_options(vars: &HashMap<String, String>) -> HashMap<String, String> {
    let direct = [
        ("SLUICE_TOPIC", TOPIC_KEY),
        ("SLUICE_SEMANTICS", SEMANTICS_KEY),
        ("SLUICE_TRANSACTION_PREFIX", TRANSACTION_PREFIX_KEY),
        ("SLUICE_PARTITION_KEY_FIELD", PARTITION_KEY_FIELD_KEY),
    ];

    let mut options: HashMap<String, String> = direct
        .iter()
        .filter_map(|(env, key)| vars.get(*env).map(|value| (key.to_string(), value.clone())))
        .collect();

    for (name, value) in vars {
        if let Some(property) = name.strip_prefix(ENV_KAFKA_PREFIX) {
            let property = property.to_ascii_lowercase().replace('_', ".");
            options.insert(format!("{KAFKA_CONFIG_PREFIX}{property}"), value.clone());
        }
    }
    options
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T> {
    match vars.get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name}={value} is not valid"))),
        None => Ok(default),
    }
}

impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(vars: HashMap<String, String>) -> Result<Self> {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(name, _)| name.starts_with(ENV_PREFIX))
            .collect();

        let sink = SinkConfig::try_from(sink_options(&vars))?;

        let job_id = vars
            .get(ENV_JOB_ID)
            .cloned()
            .unwrap_or_else(|| DEFAULT_JOB_ID.to_string());
        let subtask_index = parse_var(&vars, ENV_SUBTASK_INDEX, 0u32)?;

        let checkpoint_records =
            parse_var(&vars, ENV_CHECKPOINT_RECORDS, DEFAULT_CHECKPOINT_RECORDS)?;
        if checkpoint_records == 0 {
            return Err(Error::Config(format!(
                "{ENV_CHECKPOINT_RECORDS} must be greater than 0"
            )));
        }

        let fields = vars
            .get(ENV_FIELDS)
            .map(String::as_str)
            .unwrap_or(DEFAULT_FIELDS);
        let row_type = RowType::new(
            fields
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty()),
        );
        if row_type.arity() == 0 {
            return Err(Error::Config(format!("{ENV_FIELDS} names no field")));
        }

        let state_path = vars
            .get(ENV_STATE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));

        Ok(Settings {
            sink,
            context: SinkContext::new(job_id, subtask_index),
            row_type,
            checkpoint_records,
            state_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use sluice_core::Semantics;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_settings_from_env() {
        let settings = Settings::try_from(vars(&[
            ("SLUICE_TOPIC", "orders"),
            ("SLUICE_SEMANTICS", "EXACTLY_ONCE"),
            ("SLUICE_KAFKA_BOOTSTRAP_SERVERS", "b1:9092,b2:9092"),
            ("SLUICE_KAFKA_COMPRESSION_TYPE", "lz4"),
            ("SLUICE_JOB_ID", "orders-job"),
            ("SLUICE_SUBTASK_INDEX", "2"),
            ("SLUICE_CHECKPOINT_RECORDS", "50"),
            ("SLUICE_FIELDS", "id, name"),
            ("SLUICE_STATE_PATH", "/var/lib/sluice/state.json"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();

        assert_eq!(settings.sink.topic, "orders");
        assert_eq!(settings.sink.semantics, Semantics::ExactlyOnce);
        assert_eq!(settings.sink.brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(
            settings.sink.kafka_properties.get("compression.type"),
            Some(&"lz4".to_string())
        );
        assert_eq!(settings.context, SinkContext::new("orders-job", 2));
        assert_eq!(settings.row_type, RowType::new(["id", "name"]));
        assert_eq!(settings.checkpoint_records, 50);
        assert_eq!(
            settings.state_path,
            PathBuf::from("/var/lib/sluice/state.json")
        );
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::try_from(vars(&[
            ("SLUICE_TOPIC", "orders"),
            ("SLUICE_KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
        ]))
        .unwrap();

        assert_eq!(settings.sink.semantics, Semantics::None);
        assert_eq!(settings.context, SinkContext::new("sluice", 0));
        assert_eq!(settings.row_type, RowType::new(["value"]));
        assert_eq!(settings.checkpoint_records, 1000);
        assert_eq!(settings.state_path, PathBuf::from("sluice-state.json"));
    }

    #[test]
    fn test_invalid_settings() {
        let base = [
            ("SLUICE_TOPIC", "orders"),
            ("SLUICE_KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
        ];

        let mut invalid = vars(&base);
        invalid.insert(
            "SLUICE_CHECKPOINT_RECORDS".to_string(),
            "0".to_string(),
        );
        assert!(matches!(Settings::try_from(invalid), Err(Error::Config(_))));

        let mut invalid = vars(&base);
        invalid.insert("SLUICE_SUBTASK_INDEX".to_string(), "-1".to_string());
        assert!(matches!(Settings::try_from(invalid), Err(Error::Config(_))));

        let mut invalid = vars(&base);
        invalid.insert("SLUICE_FIELDS".to_string(), " , ".to_string());
        assert!(matches!(Settings::try_from(invalid), Err(Error::Config(_))));

        assert!(matches!(
            Settings::try_from(vars(&[("SLUICE_TOPIC", "orders")])),
            Err(Error::Sink(sluice_core::Error::Config(_)))
        ));
    }
}
