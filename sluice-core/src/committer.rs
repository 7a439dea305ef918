//! Finalizes prepared transactions once the coordinator decided a checkpoint's fate.

use tracing::{error, info, warn};

use crate::Result;
use crate::broker::{self, BrokerProducer};
use crate::sender::PreparedTransactions;
use crate::state::CommitToken;

/// Commits or aborts the transactions a [crate::writer::SinkWriter] prepared.
///
/// Shares the prepared-transaction registry with the writer, so it can run on a
/// different task than the one writing.
pub struct SinkCommitter<P> {
    prepared: PreparedTransactions<P>,
}

impl<P> Clone for SinkCommitter<P> {
    fn clone(&self) -> Self {
        Self {
            prepared: self.prepared.clone(),
        }
    }
}

impl<P: BrokerProducer> SinkCommitter<P> {
    pub(crate) fn new(prepared: PreparedTransactions<P>) -> Self {
        Self { prepared }
    }

    /// Commits the transactions behind `tokens` and returns the tokens whose
    /// commit failed, so they can be retried. Tokens with no prepared transaction
    /// were already finalized and are skipped.
    pub async fn commit(&self, tokens: Vec<CommitToken>) -> Vec<CommitToken> {
        let mut failed = Vec::new();
        for token in tokens {
            let Some(mut producer) = self.prepared.take(&token.transactional_id) else {
                warn!(
                    transactional_id = %token.transactional_id,
                    "No prepared transaction for commit token, skipping"
                );
                continue;
            };
            match producer.commit_transaction().await {
                Ok(()) => {
                    info!(
                        transactional_id = %token.transactional_id,
                        records = token.record_count,
                        "Committed transaction"
                    );
                    broker::discard(producer, Some(&token.transactional_id)).await;
                }
                Err(e) => {
                    error!(
                        ?e,
                        transactional_id = %token.transactional_id,
                        "Failed to commit transaction"
                    );
                    self.prepared
                        .insert(token.transactional_id.clone(), producer);
                    failed.push(token);
                }
            }
        }
        failed
    }

    /// Aborts the transactions behind `tokens`. Every token is attempted; the
    /// first failure is returned. Transactions that failed to abort stay
    /// prepared, so a later abort of the committer or the writer retries them.
    pub async fn abort(&self, tokens: &[CommitToken]) -> Result<()> {
        let mut failure = None;
        for token in tokens {
            let Some(mut producer) = self.prepared.take(&token.transactional_id) else {
                warn!(
                    transactional_id = %token.transactional_id,
                    "No prepared transaction for commit token, skipping"
                );
                continue;
            };
            match producer.abort_transaction().await {
                Ok(()) => {
                    info!(transactional_id = %token.transactional_id, "Aborted transaction");
                    broker::discard(producer, Some(&token.transactional_id)).await;
                }
                Err(e) => {
                    error!(
                        ?e,
                        transactional_id = %token.transactional_id,
                        "Failed to abort transaction"
                    );
                    self.prepared
                        .insert(token.transactional_id.clone(), producer);
                    failure = failure.or(Some(e));
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use sluice_testing::simplebroker::{Record, SimpleBroker, SimpleProducer};

    use super::*;
    use crate::Error;
    use crate::broker::ProducerFactory;
    use crate::broker::simplebroker::{SimpleBrokerFactory, TEST_TOPIC, payloads};
    use crate::state::TransactionId;

    /// Opens a transaction with one record and registers it as prepared.
    async fn prepare(
        broker: &SimpleBroker,
        prepared: &PreparedTransactions<SimpleProducer>,
        epoch: u64,
        payload: &str,
    ) -> CommitToken {
        let transactional_id = TransactionId::new("sluice-job", 0, epoch);
        let mut producer = SimpleBrokerFactory::new(broker)
            .create(Some(&transactional_id))
            .unwrap();
        producer.init_transactions().await.unwrap();
        producer.begin_transaction().await.unwrap();
        let record = Record {
            payload: payload.to_string().into(),
            ..Default::default()
        };
        producer.send(record).unwrap().await.unwrap();
        prepared.insert(transactional_id.clone(), producer);
        CommitToken {
            transactional_id,
            epoch,
            record_count: 1,
        }
    }

    #[tokio::test]
    async fn test_commit_makes_records_visible() {
        let broker = SimpleBroker::new();
        let prepared = PreparedTransactions::default();
        let committer = SinkCommitter::new(prepared.clone());

        let first = prepare(&broker, &prepared, 1, "a").await;
        let second = prepare(&broker, &prepared, 2, "b").await;
        assert!(broker.committed(TEST_TOPIC).is_empty());

        let failed = committer.commit(vec![first, second]).await;
        assert!(failed.is_empty());
        assert_eq!(payloads(&broker.committed(TEST_TOPIC)), vec!["a", "b"]);
        assert_eq!(prepared.len(), 0);
    }

    #[tokio::test]
    async fn test_commit_skips_unknown_tokens() {
        let broker = SimpleBroker::new();
        let prepared = PreparedTransactions::default();
        let committer = SinkCommitter::new(prepared.clone());

        let token = prepare(&broker, &prepared, 1, "a").await;
        assert!(committer.commit(vec![token.clone()]).await.is_empty());
        // committing again finds nothing to do
        assert!(committer.commit(vec![token]).await.is_empty());
        assert_eq!(payloads(&broker.committed(TEST_TOPIC)), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_commit_can_be_retried() {
        let broker = SimpleBroker::new();
        let prepared = PreparedTransactions::default();
        let committer = SinkCommitter::new(prepared.clone());
        let token = prepare(&broker, &prepared, 1, "a").await;

        broker.error_injector().fail_commits(1);
        let failed = committer.commit(vec![token.clone()]).await;
        assert_eq!(failed, vec![token]);
        assert!(broker.committed(TEST_TOPIC).is_empty());

        assert!(committer.commit(failed).await.is_empty());
        assert_eq!(payloads(&broker.committed(TEST_TOPIC)), vec!["a"]);
    }

    #[tokio::test]
    async fn test_abort_attempts_every_token() {
        let broker = SimpleBroker::new();
        let prepared = PreparedTransactions::default();
        let committer = SinkCommitter::new(prepared.clone());
        let first = prepare(&broker, &prepared, 1, "a").await;
        let second = prepare(&broker, &prepared, 2, "b").await;

        broker.error_injector().fail_aborts(1);
        let tokens = [first, second];
        let result = committer.abort(&tokens).await;
        assert!(matches!(result, Err(Error::Broker(_))));
        // the second transaction was rolled back despite the first failure
        assert_eq!(payloads(&broker.uncommitted(TEST_TOPIC)), vec!["a"]);
        assert!(broker.committed(TEST_TOPIC).is_empty());

        // the first one is still prepared and the retry aborts it
        assert_eq!(prepared.len(), 1);
        committer.abort(&tokens).await.unwrap();
        assert_eq!(prepared.len(), 0);
        assert!(broker.uncommitted(TEST_TOPIC).is_empty());
        assert!(broker.ongoing_sessions().is_empty());
    }
}
