//! Simple broker producer implementation.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use super::broker::{BrokerState, Owner, Record, StoredRecord, Visibility};
use super::error::{Result, SimpleBrokerError};
use super::error_injector::ErrorInjector;

/// Producer bound to one topic, optionally transactional.
///
/// Mirrors the Kafka producer lifecycle: a transactional producer must call
/// `init_transactions` once, then `begin_transaction` before every transaction.
#[derive(Debug)]
pub struct SimpleProducer {
    pub(super) state: Arc<RwLock<BrokerState>>,
    pub(super) error_injector: Arc<ErrorInjector>,
    pub(super) topic: String,
    pub(super) transactional_id: Option<String>,
    pub(super) producer_epoch: Option<u64>,
    pub(super) in_transaction: bool,
    pub(super) closed: bool,
}

impl SimpleProducer {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends the record to the topic and returns a future that resolves to the
    /// delivery outcome. Records keep their send order.
    pub fn send(
        &mut self,
        record: Record,
    ) -> Result<impl Future<Output = Result<()>> + Send + 'static> {
        if self.closed {
            return Err(SimpleBrokerError::State("producer is closed".to_string()));
        }
        let fail = self.error_injector.should_fail_delivery();
        let latency = self.error_injector.delivery_latency();

        let outcome = {
            let mut state = self.state.write();
            match (&self.transactional_id, self.producer_epoch) {
                (None, _) => {
                    if !fail {
                        state.append(
                            &self.topic,
                            StoredRecord {
                                record,
                                owner: None,
                                visibility: Visibility::Committed,
                            },
                        );
                    }
                    Ok(())
                }
                (Some(id), Some(epoch)) if self.in_transaction => {
                    if state.is_fenced(id, epoch) {
                        Err(SimpleBrokerError::Fenced(id.clone()))
                    } else {
                        if !fail {
                            state.append(
                                &self.topic,
                                StoredRecord {
                                    record,
                                    owner: Some(Owner {
                                        transactional_id: id.clone(),
                                        producer_epoch: epoch,
                                    }),
                                    visibility: Visibility::Ongoing,
                                },
                            );
                        }
                        Ok(())
                    }
                }
                (Some(id), _) => {
                    return Err(SimpleBrokerError::State(format!(
                        "no transaction in progress for {id}"
                    )));
                }
            }
        };

        let outcome = match outcome {
            Ok(()) if fail => Err(SimpleBrokerError::Delivery(
                "injected delivery failure".to_string(),
            )),
            outcome => outcome,
        };

        Ok(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            outcome
        })
    }

    pub async fn init_transactions(&mut self) -> Result<()> {
        let id = self.require_transactional_id()?;
        let epoch = self.state.write().init_session(&id);
        self.producer_epoch = Some(epoch);
        self.in_transaction = false;
        Ok(())
    }

    pub async fn begin_transaction(&mut self) -> Result<()> {
        let (id, epoch) = self.require_initialized()?;
        if self.in_transaction {
            return Err(SimpleBrokerError::State(format!(
                "transaction already in progress for {id}"
            )));
        }
        let mut state = self.state.write();
        if state.is_fenced(&id, epoch) {
            return Err(SimpleBrokerError::Fenced(id));
        }
        if let Some(session) = state.sessions.get_mut(&id) {
            session.ongoing = true;
        }
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> Result<()> {
        self.finish_transaction(Visibility::Committed)
    }

    pub async fn abort_transaction(&mut self) -> Result<()> {
        self.finish_transaction(Visibility::Aborted)
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Closes the producer. An open transaction is left as is, the way a crashed
    /// process would leave it.
    pub async fn close(&mut self) -> Result<()> {
        if self.error_injector.should_fail_close() {
            return Err(SimpleBrokerError::Close(
                "injected close failure".to_string(),
            ));
        }
        self.closed = true;
        Ok(())
    }

    fn finish_transaction(&mut self, to: Visibility) -> Result<()> {
        let (id, epoch) = self.require_initialized()?;
        if !self.in_transaction {
            return Err(SimpleBrokerError::State(format!(
                "no transaction in progress for {id}"
            )));
        }
        let mut state = self.state.write();
        if state.is_fenced(&id, epoch) {
            return Err(SimpleBrokerError::Fenced(id));
        }
        match to {
            Visibility::Committed if self.error_injector.should_fail_commit() => {
                return Err(SimpleBrokerError::Commit(
                    "injected commit failure".to_string(),
                ));
            }
            Visibility::Aborted if self.error_injector.should_fail_abort() => {
                return Err(SimpleBrokerError::Abort(
                    "injected abort failure".to_string(),
                ));
            }
            _ => {}
        }
        state.resolve(&id, Some(epoch), to);
        self.in_transaction = false;
        Ok(())
    }

    fn require_transactional_id(&self) -> Result<String> {
        self.transactional_id.clone().ok_or_else(|| {
            SimpleBrokerError::State("producer is not transactional".to_string())
        })
    }

    fn require_initialized(&self) -> Result<(String, u64)> {
        let id = self.require_transactional_id()?;
        let epoch = self.producer_epoch.ok_or_else(|| {
            SimpleBrokerError::State(format!("transactions not initialized for {id}"))
        })?;
        Ok((id, epoch))
    }
}
