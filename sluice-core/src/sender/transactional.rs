//! Exactly-once delivery through broker transactions.
//!
//! Every checkpoint epoch gets its own transactional id and producer:
//!
//! ```text
//!   begin(epoch n) -> send* -> prepare_commit -> token(n) -> committer commits
//!                                    |
//!                                    +-> begin(epoch n + 1)
//! ```
//!
//! After `prepare_commit` the producer of epoch `n` waits in the
//! [PreparedTransactions] registry until the committer commits it or `abort`
//! rolls it back. The sender keeps writing under epoch `n + 1` meanwhile.
//!
//! A transaction whose rollback the broker did not confirm is kept as
//! unresolved: it is part of every snapshot and `abort` retries it by session
//! id until the broker aborts it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::broker::{self, BrokerProducer, ProducerFactory};
use crate::delivery::{self, DeliveryHandle};
use crate::record::ProducerRecord;
use crate::sender::ProduceSender;
use crate::state::{CommitToken, DeliveryStrategy, SinkState, TransactionId};
use crate::{Error, Result};

/// Producers of transactions that are prepared but not yet committed or aborted,
/// shared between a sender and the committer.
pub(crate) struct PreparedTransactions<P> {
    inner: Arc<Mutex<HashMap<TransactionId, P>>>,
}

impl<P> Clone for PreparedTransactions<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for PreparedTransactions<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<P> PreparedTransactions<P> {
    pub(crate) fn insert(&self, transactional_id: TransactionId, producer: P) {
        self.inner.lock().insert(transactional_id, producer);
    }

    /// Takes the producer out. Whoever holds it owns the transaction's outcome.
    pub(crate) fn take(&self, transactional_id: &TransactionId) -> Option<P> {
        self.inner.lock().remove(transactional_id)
    }

    pub(crate) fn drain(&self) -> Vec<(TransactionId, P)> {
        let mut prepared: Vec<_> = self.inner.lock().drain().collect();
        prepared.sort_by(|(a, _), (b, _)| a.cmp(b));
        prepared
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// The transaction records are currently written to.
struct OpenTransaction<P> {
    transactional_id: TransactionId,
    epoch: u64,
    producer: P,
    in_flight: Vec<DeliveryHandle>,
    acked: u64,
}

pub(crate) struct TransactionalSender<F: ProducerFactory> {
    factory: F,
    prefix: String,
    subtask_index: u32,
    /// Epoch of the next transaction to begin.
    next_epoch: u64,
    /// Sequence of the next record, across epochs.
    next_seq: u64,
    current: Option<OpenTransaction<F::Producer>>,
    prepared: PreparedTransactions<F::Producer>,
    /// Transactions whose rollback failed.
    unresolved: Vec<SinkState>,
}

impl<F: ProducerFactory> TransactionalSender<F> {
    /// Aborts every transaction named in `recovered`, then opens the first
    /// transaction. Epochs continue after the highest recovered one.
    pub(crate) async fn new(
        factory: F,
        prefix: String,
        subtask_index: u32,
        recovered: &[SinkState],
        prepared: PreparedTransactions<F::Producer>,
    ) -> Result<Self> {
        let aborted = recover(&factory, recovered).await?;
        let next_epoch = recovered
            .iter()
            .map(|state| state.epoch)
            .max()
            .map_or(1, |epoch| epoch + 1);
        info!(
            prefix = %prefix,
            subtask_index, aborted, next_epoch, "Starting transactional sender"
        );

        let mut sender = Self {
            factory,
            prefix,
            subtask_index,
            next_epoch,
            next_seq: 0,
            current: None,
            prepared,
            unresolved: Vec::new(),
        };
        sender.begin().await?;
        Ok(sender)
    }

    async fn begin(&mut self) -> Result<()> {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let transactional_id = TransactionId::new(&self.prefix, self.subtask_index, epoch);

        let mut producer = self.factory.create(Some(&transactional_id))?;
        let started = match producer.init_transactions().await {
            Ok(()) => producer.begin_transaction().await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            error!(?e, %transactional_id, "Failed to begin transaction");
            broker::discard(producer, Some(&transactional_id)).await;
            return Err(e);
        }

        debug!(%transactional_id, "Began transaction");
        self.current = Some(OpenTransaction {
            transactional_id,
            epoch,
            producer,
            in_flight: Vec::new(),
            acked: 0,
        });
        Ok(())
    }

    /// Rolls back `producer`'s transaction and closes it. A transaction the
    /// broker did not abort becomes unresolved.
    async fn rollback(
        &mut self,
        mut producer: F::Producer,
        transactional_id: TransactionId,
        epoch: u64,
    ) -> Result<()> {
        let aborted = producer.abort_transaction().await;
        broker::discard(producer, Some(&transactional_id)).await;
        match aborted {
            Ok(()) => {
                info!(%transactional_id, "Aborted transaction");
                Ok(())
            }
            Err(e) => {
                error!(?e, %transactional_id, "Failed to abort transaction, keeping it unresolved");
                self.unresolved
                    .push(SinkState::transactional(transactional_id, epoch));
                Err(e)
            }
        }
    }

    /// Aborts the unresolved transactions by session id. The ones that still
    /// fail stay unresolved; the first failure is returned.
    async fn abort_unresolved(&mut self) -> Result<()> {
        let mut failure = None;
        for state in std::mem::take(&mut self.unresolved) {
            let transactional_id = &state.transactional_id;
            match self.factory.abort_session(transactional_id).await {
                Ok(()) | Err(Error::UnknownSession(_)) => {
                    info!(%transactional_id, "Aborted unresolved transaction");
                }
                Err(e) => {
                    error!(?e, %transactional_id, "Failed to abort unresolved transaction");
                    failure = failure.or(Some(e));
                    self.unresolved.push(state);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Asks the broker to abort the session of every recovered state, in order.
/// Sessions the broker no longer knows are fine; any other failure stops recovery.
async fn recover<F: ProducerFactory>(factory: &F, recovered: &[SinkState]) -> Result<usize> {
    let mut aborted = 0;
    for state in recovered {
        if state.strategy != DeliveryStrategy::Transactional {
            debug!(?state, "Skipping non-transactional state");
            continue;
        }
        let transactional_id = &state.transactional_id;
        match factory.abort_session(transactional_id).await {
            Ok(()) => {
                info!(%transactional_id, "Aborted transaction left by a previous run");
                aborted += 1;
            }
            Err(Error::UnknownSession(_)) => {
                info!(%transactional_id, "Broker does not know the session, nothing to abort");
            }
            Err(e) => {
                error!(?e, %transactional_id, "Failed to abort recovered transaction");
                return Err(Error::Recovery {
                    transactional_id: transactional_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(aborted)
}

impl<F: ProducerFactory> ProduceSender for TransactionalSender<F> {
    fn send(&mut self, record: ProducerRecord) -> Result<u64> {
        let Some(txn) = self.current.as_mut() else {
            return Err(Error::State(
                "no open transaction, abort() has to run before writing again".to_string(),
            ));
        };
        txn.acked += delivery::reap_acked(&mut txn.in_flight);

        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = match txn.producer.send(record) {
            Ok(pending) => DeliveryHandle::new(seq, pending),
            Err(e) => {
                warn!(?e, seq, transactional_id = %txn.transactional_id, "Producer refused record");
                DeliveryHandle::failed(seq, e.to_string())
            }
        };
        txn.in_flight.push(handle);
        Ok(seq)
    }

    fn snapshot_state(&self) -> Vec<SinkState> {
        self.current
            .iter()
            .map(|txn| SinkState::transactional(txn.transactional_id.clone(), txn.epoch))
            .chain(self.unresolved.iter().cloned())
            .collect()
    }

    async fn prepare_commit(&mut self) -> Result<Option<CommitToken>> {
        let Some(mut txn) = self.current.take() else {
            return Err(Error::State(
                "no open transaction to prepare, abort() has to run first".to_string(),
            ));
        };

        let flushed = match txn.producer.flush().await {
            Ok(()) => delivery::resolve_all(std::mem::take(&mut txn.in_flight)).await,
            Err(e) => Err(e),
        };
        let acked = match flushed {
            Ok(acked) => acked,
            Err(e) => {
                error!(
                    ?e,
                    transactional_id = %txn.transactional_id,
                    "Transaction is not committable"
                );
                // a failed rollback keeps the transaction unresolved
                let _ = self
                    .rollback(txn.producer, txn.transactional_id, txn.epoch)
                    .await;
                return Err(e);
            }
        };

        let token = CommitToken {
            transactional_id: txn.transactional_id.clone(),
            epoch: txn.epoch,
            record_count: txn.acked + acked,
        };
        self.prepared.insert(txn.transactional_id, txn.producer);
        info!(
            transactional_id = %token.transactional_id,
            records = token.record_count,
            "Prepared transaction"
        );

        self.begin().await?;
        Ok(Some(token))
    }

    async fn abort(&mut self) -> Result<()> {
        let mut failure = self.abort_unresolved().await.err();

        if let Some(txn) = self.current.take() {
            if let Err(e) = self
                .rollback(txn.producer, txn.transactional_id, txn.epoch)
                .await
            {
                failure = failure.or(Some(e));
            }
        }
        for (transactional_id, producer) in self.prepared.drain() {
            let epoch = transactional_id.parts().map_or(0, |(_, _, epoch)| epoch);
            if let Err(e) = self.rollback(producer, transactional_id, epoch).await {
                failure = failure.or(Some(e));
            }
        }

        self.begin().await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        if let Err(e) = self.abort_unresolved().await {
            failures.push(format!("aborting unresolved transactions: {e}"));
        }
        if let Some(mut txn) = self.current.take() {
            if let Err(e) = txn.producer.abort_transaction().await {
                failures.push(format!("aborting {}: {e}", txn.transactional_id));
            }
            if let Err(e) = txn.producer.close().await {
                failures.push(format!("closing {}: {e}", txn.transactional_id));
            }
        }
        if failures.is_empty() {
            debug!("Closed transactional sender");
            Ok(())
        } else {
            Err(Error::Close(failures.join("; ")))
        }
    }
}
