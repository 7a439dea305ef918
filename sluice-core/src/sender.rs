//! Produce senders hand serialized records to the broker and decide what a
//! checkpoint means for them.

use crate::Result;
use crate::broker::ProducerFactory;
use crate::record::ProducerRecord;
use crate::state::{CommitToken, SinkState};

/// Fire-and-forget sender, used when no delivery guarantee is requested.
#[path = "sender/simple.rs"]
mod simple;
pub(crate) use simple::SimpleSender;

/// One broker transaction per checkpoint epoch.
#[path = "sender/transactional.rs"]
mod transactional;
pub(crate) use transactional::{PreparedTransactions, TransactionalSender};

#[trait_variant::make(ProduceSender: Send)]
#[allow(dead_code)]
pub(crate) trait LocalProduceSender {
    /// Hands the record to the broker without waiting for the acknowledgement.
    /// Returns the sequence number of the record within the sender.
    fn send(&mut self, record: ProducerRecord) -> Result<u64>;

    /// Identity of the currently open transaction, if any. Does not change state.
    fn snapshot_state(&self) -> Vec<SinkState>;

    /// Waits for every pending record. Returns a token when there is a
    /// transaction to commit.
    async fn prepare_commit(&mut self) -> Result<Option<CommitToken>>;

    /// Discards every record not yet committed and starts over.
    async fn abort(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

pub(crate) enum SenderType<F: ProducerFactory> {
    Simple(SimpleSender<F::Producer>),
    Transactional(TransactionalSender<F>),
}

impl<F: ProducerFactory> ProduceSender for SenderType<F> {
    fn send(&mut self, record: ProducerRecord) -> Result<u64> {
        match self {
            SenderType::Simple(sender) => ProduceSender::send(sender, record),
            SenderType::Transactional(sender) => ProduceSender::send(sender, record),
        }
    }

    fn snapshot_state(&self) -> Vec<SinkState> {
        match self {
            SenderType::Simple(sender) => ProduceSender::snapshot_state(sender),
            SenderType::Transactional(sender) => ProduceSender::snapshot_state(sender),
        }
    }

    async fn prepare_commit(&mut self) -> Result<Option<CommitToken>> {
        match self {
            SenderType::Simple(sender) => ProduceSender::prepare_commit(sender).await,
            SenderType::Transactional(sender) => ProduceSender::prepare_commit(sender).await,
        }
    }

    async fn abort(&mut self) -> Result<()> {
        match self {
            SenderType::Simple(sender) => ProduceSender::abort(sender).await,
            SenderType::Transactional(sender) => ProduceSender::abort(sender).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SenderType::Simple(sender) => ProduceSender::close(sender).await,
            SenderType::Transactional(sender) => ProduceSender::close(sender).await,
        }
    }
}
