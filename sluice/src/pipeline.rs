//! Reads rows from stdin and writes them through the sink, taking a checkpoint
//! every `checkpoint_records` rows, at the end of the input and on shutdown.
//!
//! A checkpoint stores the writer's states, prepares the epoch and commits the
//! resulting token. Tokens that fail to commit are retried at the next
//! checkpoint and stay in the stored states until they succeed, so a restart
//! aborts them instead of leaving them to the broker's transaction timeout.

use serde_json::Value;
use sluice_core::broker::ProducerFactory;
use sluice_core::{CommitToken, Row, SinkCommitter, SinkState, SinkWriter};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::state_store::StateStore;

pub(crate) async fn run(settings: Settings, cln_token: CancellationToken) -> Result<()> {
    let store = StateStore::new(&settings.state_path);
    let recovered = store.load().await?;

    let writer = SinkWriter::connect(
        settings.context.clone(),
        settings.row_type.clone(),
        &settings.sink,
        recovered,
    )
    .await?;

    let input = BufReader::new(tokio::io::stdin());
    forward(
        writer,
        store,
        input,
        settings.checkpoint_records,
        settings.row_type.arity(),
        cln_token,
    )
    .await
}

/// Drives `writer` until the input ends or `cln_token` is cancelled. On failure
/// the writer's uncommitted work is aborted. The writer is closed either way.
pub(crate) async fn forward<F, R>(
    mut writer: SinkWriter<F>,
    store: StateStore,
    input: R,
    checkpoint_records: usize,
    arity: usize,
    cln_token: CancellationToken,
) -> Result<()>
where
    F: ProducerFactory,
    R: AsyncBufRead + Unpin,
{
    let context = writer.context().clone();
    let mut checkpoints = Checkpoints {
        store,
        committer: writer.committer(),
        uncommitted: Vec::new(),
        completed: 0,
    };

    let result = pump(
        &mut writer,
        &mut checkpoints,
        input,
        checkpoint_records,
        arity,
        &cln_token,
    )
    .await;

    if let Err(e) = &result {
        error!(?e, "Sink failed, aborting uncommitted records");
        if let Err(abort_err) = writer.abort().await {
            warn!(?abort_err, "Failed to abort uncommitted records");
        }
    }

    let closed = writer.close().await;
    match (result, closed) {
        (Err(e), Err(close_err)) => {
            warn!(?close_err, "Failed to close sink writer");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), Err(close_err)) => Err(close_err.into()),
        (Ok(()), Ok(())) => {
            info!(
                job_id = %context.job_id,
                subtask_index = context.subtask_index,
                checkpoints = checkpoints.completed,
                "Sink finished"
            );
            Ok(())
        }
    }
}

async fn pump<F, R>(
    writer: &mut SinkWriter<F>,
    checkpoints: &mut Checkpoints<F::Producer>,
    input: R,
    checkpoint_records: usize,
    arity: usize,
    cln_token: &CancellationToken,
) -> Result<()>
where
    F: ProducerFactory,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut line_number = 0u64;
    let mut since_checkpoint = 0;

    loop {
        let line = tokio::select! {
            _ = cln_token.cancelled() => {
                info!("Shutdown requested, taking a final checkpoint");
                break;
            }
            line = lines.next_line() => {
                line.map_err(|e| Error::Input(e.to_string()))?
            }
        };
        let Some(line) = line else {
            break;
        };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        match writer.write(&parse_row(&line, arity)) {
            Ok(()) => since_checkpoint += 1,
            Err(sluice_core::Error::Serialize(reason)) => {
                warn!(line_number, %reason, "Skipping row");
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        if since_checkpoint >= checkpoint_records {
            checkpoints.take(writer).await?;
            since_checkpoint = 0;
        }
    }

    checkpoints.take(writer).await?;
    if !checkpoints.uncommitted.is_empty() {
        return Err(Error::Commit(format!(
            "{} prepared transactions could not be committed",
            checkpoints.uncommitted.len()
        )));
    }
    Ok(())
}

struct Checkpoints<P> {
    store: StateStore,
    committer: SinkCommitter<P>,
    /// Tokens whose commit failed, retried at every checkpoint.
    uncommitted: Vec<CommitToken>,
    completed: u64,
}

impl<P: sluice_core::broker::BrokerProducer> Checkpoints<P> {
    async fn take<F>(&mut self, writer: &mut SinkWriter<F>) -> Result<()>
    where
        F: ProducerFactory<Producer = P>,
    {
        let checkpoint_id = self.completed + 1;

        let mut states = writer.snapshot_state();
        for token in &self.uncommitted {
            let state = SinkState::transactional(token.transactional_id.clone(), token.epoch);
            states.push(state);
        }
        self.store.save(&states).await?;

        if let Some(token) = writer.prepare_commit().await? {
            self.uncommitted.push(token);
        }
        let tokens = std::mem::take(&mut self.uncommitted);
        let committed = tokens.len();
        self.uncommitted = self.committer.commit(tokens).await;
        if !self.uncommitted.is_empty() {
            warn!(
                checkpoint_id,
                failed = self.uncommitted.len(),
                "Some transactions failed to commit, retrying at the next checkpoint"
            );
        }

        self.completed = checkpoint_id;
        info!(
            checkpoint_id,
            committed = committed - self.uncommitted.len(),
            "Checkpoint completed"
        );
        Ok(())
    }
}

/// Turns an input line into a row of `arity` fields. A JSON array with `arity`
/// elements gives the fields; for single-field rows any JSON value, or the raw
/// line when it is not JSON, is the field.
fn parse_row(line: &str, arity: usize) -> Row {
    let value = serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()));
    match value {
        Value::Array(fields) if fields.len() == arity => Row::new(fields),
        other if arity == 1 => Row::new(vec![other]),
        Value::Array(fields) => Row::new(fields),
        other => Row::new(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde_json::json;
    use sluice_core::broker::simplebroker::{SimpleBrokerFactory, TEST_TOPIC, payloads};
    use sluice_core::config::{SEMANTICS_KEY, TOPIC_KEY};
    use sluice_core::{RowType, SinkConfig, SinkContext, TransactionId};
    use sluice_testing::simplebroker::{Record, SimpleBroker};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    use super::*;

    async fn writer(broker: &SimpleBroker) -> SinkWriter<SimpleBrokerFactory> {
        let options = HashMap::from([
            (TOPIC_KEY.to_string(), TEST_TOPIC.to_string()),
            (SEMANTICS_KEY.to_string(), "exactly-once".to_string()),
            (
                "kafka.bootstrap.servers".to_string(),
                "localhost:9092".to_string(),
            ),
        ]);
        let config = SinkConfig::try_from(options).unwrap();
        SinkWriter::new(
            SinkContext::new("job", 0),
            RowType::new(["value"]),
            &config,
            Vec::new(),
            SimpleBrokerFactory::new(broker),
        )
        .await
        .unwrap()
    }

    fn state(epoch: u64) -> SinkState {
        SinkState::transactional(TransactionId::new("sluice-job", 0, epoch), epoch)
    }

    fn values(records: &[Record]) -> Vec<String> {
        payloads(records)
            .iter()
            .map(|payload| {
                let value: Value = serde_json::from_str(payload).unwrap();
                value["value"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_forward_checkpoints_every_n_rows() {
        let broker = SimpleBroker::new();
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let input = "a\nb\n\nc\nd\ne\n";

        forward(
            writer(&broker).await,
            store.clone(),
            BufReader::new(input.as_bytes()),
            2,
            1,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            values(&broker.committed(TEST_TOPIC)),
            ["a", "b", "c", "d", "e"]
        );
        // the last checkpoint stored the epoch it prepared
        assert_eq!(store.load().await.unwrap(), vec![state(3)]);
        assert!(broker.ongoing_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_forward_retries_failed_commit() {
        let broker = SimpleBroker::new();
        broker.error_injector().fail_commits(1);
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        forward(
            writer(&broker).await,
            store,
            BufReader::new("a\nb\nc\nd\n".as_bytes()),
            2,
            1,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(values(&broker.committed(TEST_TOPIC)), ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_forward_fails_when_commits_keep_failing() {
        let broker = SimpleBroker::new();
        broker.error_injector().fail_commits(10);
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let result = forward(
            writer(&broker).await,
            store.clone(),
            BufReader::new("a\nb\n".as_bytes()),
            2,
            1,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::Commit(_))));
        // the token that failed to commit was stored with the final checkpoint
        assert_eq!(store.load().await.unwrap(), vec![state(2), state(1)]);
        // and rolled back before the writer was closed
        assert!(broker.committed(TEST_TOPIC).is_empty());
        assert!(broker.uncommitted(TEST_TOPIC).is_empty());
        assert!(broker.ongoing_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_forward_aborts_on_checkpoint_failure() {
        let broker = SimpleBroker::new();
        broker.error_injector().fail_deliveries(1);
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let result = forward(
            writer(&broker).await,
            store.clone(),
            BufReader::new("a\nb\nc\n".as_bytes()),
            2,
            1,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::Sink(sluice_core::Error::Delivery(_)))
        ));
        assert_eq!(store.load().await.unwrap(), vec![state(1)]);
        assert!(broker.uncommitted(TEST_TOPIC).is_empty());
        assert!(broker.ongoing_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_forward_takes_final_checkpoint_on_shutdown() {
        let broker = SimpleBroker::new();
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"a\nb\n").await.unwrap();

        let cln_token = CancellationToken::new();
        let shutdown = cln_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.cancel();
        });

        // the input stays open, only the cancellation ends the run
        forward(
            writer(&broker).await,
            store,
            BufReader::new(server),
            100,
            1,
            cln_token,
        )
        .await
        .unwrap();

        assert_eq!(values(&broker.committed(TEST_TOPIC)), ["a", "b"]);
        assert!(broker.ongoing_sessions().is_empty());
        drop(client);
    }

    #[test]
    fn test_parse_row() {
        assert_eq!(
            parse_row(r#"[1, "widget"]"#, 2),
            Row::new(vec![json!(1), json!("widget")])
        );
        assert_eq!(parse_row("42", 1), Row::new(vec![json!(42)]));
        assert_eq!(
            parse_row(r#"{"id": 1}"#, 1),
            Row::new(vec![json!({"id": 1})])
        );
        assert_eq!(
            parse_row("plain text", 1),
            Row::new(vec![json!("plain text")])
        );
        assert_eq!(parse_row("[7]", 1), Row::new(vec![json!(7)]));
        assert_eq!(parse_row("[1, 2]", 1), Row::new(vec![json!([1, 2])]));
    }

    #[test]
    fn test_parse_row_keeps_mismatched_arity() {
        // the writer rejects these
        assert_eq!(parse_row("[1]", 2).fields.len(), 1);
        assert_eq!(parse_row("plain text", 2).fields.len(), 1);
    }
}
