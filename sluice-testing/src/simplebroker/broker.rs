//! Internal broker state and core types for the simple broker.

use std::collections::HashMap;

use bytes::Bytes;

/// A record as stored in a topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub key: Option<Bytes>,
    pub headers: HashMap<String, String>,
    pub payload: Bytes,
}

/// Visibility of a stored record to a `read_committed` reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visibility {
    /// Written outside a transaction or by a committed transaction.
    Committed,
    /// Written by a transaction that is still open.
    Ongoing,
    /// Written by an aborted transaction, never visible.
    Aborted,
}

/// Transactional owner of a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Owner {
    pub(crate) transactional_id: String,
    pub(crate) producer_epoch: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredRecord {
    pub(crate) record: Record,
    pub(crate) owner: Option<Owner>,
    pub(crate) visibility: Visibility,
}

/// Broker-side view of one transactional id.
#[derive(Debug, Clone, Default)]
pub(crate) struct Session {
    /// Bumped by every `init_transactions` and session abort. Producers holding an
    /// older epoch are fenced.
    pub(crate) producer_epoch: u64,
    /// Whether a transaction is open for this id.
    pub(crate) ongoing: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BrokerState {
    pub(crate) topics: HashMap<String, Vec<StoredRecord>>,
    pub(crate) sessions: HashMap<String, Session>,
    /// Every session abort requested, in order, including unknown ones.
    pub(crate) abort_requests: Vec<String>,
}

impl BrokerState {
    pub(crate) fn append(&mut self, topic: &str, record: StoredRecord) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(record);
    }

    /// Registers (or re-registers) a session, fencing older producers and aborting
    /// the transaction they left open. Returns the new producer epoch.
    pub(crate) fn init_session(&mut self, transactional_id: &str) -> u64 {
        let session = self
            .sessions
            .entry(transactional_id.to_string())
            .or_default();
        let was_ongoing = session.ongoing;
        session.producer_epoch += 1;
        session.ongoing = false;
        let epoch = session.producer_epoch;
        if was_ongoing {
            self.resolve(transactional_id, None, Visibility::Aborted);
        }
        epoch
    }

    pub(crate) fn is_fenced(&self, transactional_id: &str, producer_epoch: u64) -> bool {
        self.sessions
            .get(transactional_id)
            .is_none_or(|session| session.producer_epoch != producer_epoch)
    }

    /// Moves the ongoing records of `transactional_id` to `to`. With `producer_epoch`
    /// set only records written under that epoch are touched.
    pub(crate) fn resolve(
        &mut self,
        transactional_id: &str,
        producer_epoch: Option<u64>,
        to: Visibility,
    ) {
        for stored in self.topics.values_mut().flatten() {
            let Some(owner) = &stored.owner else {
                continue;
            };
            if stored.visibility == Visibility::Ongoing
                && owner.transactional_id == transactional_id
                && producer_epoch.is_none_or(|epoch| owner.producer_epoch == epoch)
            {
                stored.visibility = to;
            }
        }
        if let Some(session) = self.sessions.get_mut(transactional_id) {
            session.ongoing = false;
        }
    }

    pub(crate) fn records(&self, topic: &str, include_ongoing: bool) -> Vec<Record> {
        self.topics
            .get(topic)
            .map(|records| {
                records
                    .iter()
                    .filter(|stored| match stored.visibility {
                        Visibility::Committed => true,
                        Visibility::Ongoing => include_ongoing,
                        Visibility::Aborted => false,
                    })
                    .map(|stored| stored.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
