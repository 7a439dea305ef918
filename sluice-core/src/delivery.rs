//! Tracking of records that were handed to the broker but not yet acknowledged.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};

use crate::{Error, Result};

/// Resolves once the broker acknowledged or rejected a record.
pub type DeliveryFuture = BoxFuture<'static, Result<()>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Acked,
    Failed(String),
}

/// Outcome of one send. Owned by the sender that issued it.
pub struct DeliveryHandle {
    seq: u64,
    status: DeliveryStatus,
    pending: Option<DeliveryFuture>,
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("seq", &self.seq)
            .field("status", &self.status)
            .finish()
    }
}

impl DeliveryHandle {
    pub fn new(seq: u64, delivery: DeliveryFuture) -> Self {
        Self {
            seq,
            status: DeliveryStatus::Pending,
            pending: Some(delivery),
        }
    }

    /// A record the producer refused to enqueue.
    pub fn failed(seq: u64, reason: impl Into<String>) -> Self {
        Self {
            seq,
            status: DeliveryStatus::Failed(reason.into()),
            pending: None,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn status(&self) -> &DeliveryStatus {
        &self.status
    }

    /// Checks the delivery without waiting.
    pub fn poll_ready(&mut self) -> &DeliveryStatus {
        if let Some(pending) = self.pending.as_mut() {
            if let Some(outcome) = pending.now_or_never() {
                self.complete(outcome);
            }
        }
        &self.status
    }

    /// Waits for the broker's answer.
    pub async fn resolve(&mut self) -> &DeliveryStatus {
        if let Some(pending) = self.pending.as_mut() {
            let outcome = pending.await;
            self.complete(outcome);
        }
        &self.status
    }

    fn complete(&mut self, outcome: Result<()>) {
        self.pending = None;
        self.status = match outcome {
            Ok(()) => DeliveryStatus::Acked,
            Err(Error::Delivery(reason)) => DeliveryStatus::Failed(reason),
            Err(e) => DeliveryStatus::Failed(e.to_string()),
        };
    }
}

/// Drops the handles that are already acknowledged and returns how many there were.
pub(crate) fn reap_acked(handles: &mut Vec<DeliveryHandle>) -> u64 {
    let before = handles.len();
    handles.retain_mut(|handle| *handle.poll_ready() != DeliveryStatus::Acked);
    (before - handles.len()) as u64
}

/// Waits for every handle. Returns the number of acknowledged records, or a
/// [Error::Delivery] naming the first failed record if any delivery failed.
pub(crate) async fn resolve_all(mut handles: Vec<DeliveryHandle>) -> Result<u64> {
    join_all(handles.iter_mut().map(DeliveryHandle::resolve)).await;

    let total = handles.len();
    let mut failed = handles.iter().filter_map(|handle| match handle.status() {
        DeliveryStatus::Failed(reason) => Some((handle.seq(), reason)),
        _ => None,
    });
    match failed.next() {
        None => Ok(total as u64),
        Some((seq, reason)) => {
            let failures = 1 + failed.count();
            Err(Error::Delivery(format!(
                "{failures} of {total} records were not delivered, first failure at record {seq}: {reason}"
            )))
        }
    }
}
