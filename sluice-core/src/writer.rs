//! The [SinkWriter] is what the pipeline talks to. It serializes rows, hands
//! them to the produce sender picked from the configured [Semantics], and drives
//! the sender through the checkpoint callbacks:
//!
//! ```text
//!   write* -> snapshot_state -> prepare_commit -> (committer.commit | abort)
//! ```
//!
//! [Semantics]: crate::config::Semantics

use sluice_kafka::producer::KafkaProducerConfig;
use tracing::{info, warn};

use crate::broker::ProducerFactory;
use crate::committer::SinkCommitter;
use crate::config::SinkConfig;
use crate::record::{Row, RowSerializer, RowType};
use crate::sender::{
    PreparedTransactions, ProduceSender, SenderType, SimpleSender, TransactionalSender,
};
use crate::state::{CommitToken, SinkState};
use crate::{Error, Result};

/// Identity of one parallel instance of the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkContext {
    pub job_id: String,
    pub subtask_index: u32,
}

impl SinkContext {
    pub fn new(job_id: impl Into<String>, subtask_index: u32) -> Self {
        Self {
            job_id: job_id.into(),
            subtask_index,
        }
    }
}

pub struct SinkWriter<F: ProducerFactory> {
    context: SinkContext,
    serializer: RowSerializer,
    sender: SenderType<F>,
    prepared: PreparedTransactions<F::Producer>,
}

impl SinkWriter<KafkaProducerConfig> {
    /// Creates a writer producing to the Kafka cluster named in `config`.
    pub async fn connect(
        context: SinkContext,
        row_type: RowType,
        config: &SinkConfig,
        recovered: Vec<SinkState>,
    ) -> Result<Self> {
        let factory = config.kafka_producer_config();
        Self::new(context, row_type, config, recovered, factory).await
    }
}

impl<F: ProducerFactory> SinkWriter<F> {
    /// Creates the writer. In transactional mode the transactions named in
    /// `recovered` are aborted first; if any of them cannot be aborted the writer
    /// is not created.
    pub async fn new(
        context: SinkContext,
        row_type: RowType,
        config: &SinkConfig,
        recovered: Vec<SinkState>,
        factory: F,
    ) -> Result<Self> {
        let serializer = RowSerializer::new(row_type, config.partition_key_field.as_deref())?;
        let prepared = PreparedTransactions::default();

        let sender = if config.semantics.is_transactional() {
            SenderType::Transactional(
                TransactionalSender::new(
                    factory,
                    config.transaction_prefix(&context),
                    context.subtask_index,
                    &recovered,
                    prepared.clone(),
                )
                .await?,
            )
        } else {
            if !recovered.is_empty() {
                warn!(
                    states = recovered.len(),
                    "Ignoring recovered sink states, semantics are not transactional"
                );
            }
            SenderType::Simple(SimpleSender::new(factory.create(None)?))
        };

        info!(
            job_id = %context.job_id,
            subtask_index = context.subtask_index,
            topic = %config.topic,
            semantics = ?config.semantics,
            "Created sink writer"
        );
        Ok(Self {
            context,
            serializer,
            sender,
            prepared,
        })
    }

    pub fn context(&self) -> &SinkContext {
        &self.context
    }

    /// Serializes the row and hands it to the broker without waiting for the
    /// acknowledgement. Delivery failures surface at the next [Self::prepare_commit].
    pub fn write(&mut self, row: &Row) -> Result<()> {
        let record = self.serializer.serialize(row)?;
        self.sender.send(record)?;
        Ok(())
    }

    /// States to store with the checkpoint. Calling it does not change the writer.
    pub fn snapshot_state(&self) -> Vec<SinkState> {
        self.sender.snapshot_state()
    }

    /// Waits until every written record is acknowledged. In transactional mode
    /// returns the token that commits them.
    pub async fn prepare_commit(&mut self) -> Result<Option<CommitToken>> {
        self.sender.prepare_commit().await
    }

    /// Rolls back everything written since the last committed checkpoint.
    pub async fn abort(&mut self) -> Result<()> {
        self.sender.abort().await
    }

    /// A committer for the tokens this writer prepares.
    pub fn committer(&self) -> SinkCommitter<F::Producer> {
        SinkCommitter::new(self.prepared.clone())
    }

    /// Releases the broker connection. The open transaction, if any, is aborted;
    /// prepared transactions stay with the committer.
    pub async fn close(mut self) -> Result<()> {
        let pending = self.prepared.len();
        if pending > 0 {
            warn!(
                pending,
                "Closing with prepared transactions that were not finalized"
            );
        }
        match self.sender.close().await {
            Ok(()) => {
                info!(
                    subtask_index = self.context.subtask_index,
                    "Closed sink writer"
                );
                Ok(())
            }
            Err(e @ Error::Close(_)) => Err(e),
            Err(e) => Err(Error::Close(e.to_string())),
        }
    }
}
