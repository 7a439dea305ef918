//! Transactional sink writer for Kafka-compatible brokers.
//!
//! Records written between two checkpoints form an epoch. With exactly-once or
//! at-least-once semantics every epoch is a broker transaction that becomes
//! visible only when the checkpoint coordinator commits the epoch's
//! [CommitToken]. A restarted writer aborts whatever the previous incarnation
//! left open, using the [SinkState]s stored with the last checkpoint.
//!
//! ```ignore
//! let config = SinkConfig::try_from(options)?;
//! let mut writer = SinkWriter::connect(context, row_type, &config, recovered).await?;
//! let committer = writer.committer();
//!
//! writer.write(&row)?;
//! let states = writer.snapshot_state();
//! if let Some(token) = writer.prepare_commit().await? {
//!     committer.commit(vec![token]).await;
//! }
//! ```

/// Error and Result types.
mod error;
pub use error::{Error, Result};

/// Sink options and the delivery semantics they select.
pub mod config;

/// Checkpoint states and commit tokens.
pub mod state;

/// Rows and their serialization into broker records.
pub mod record;

/// Acknowledgement tracking of sent records.
pub mod delivery;

/// Producer seam towards the broker.
pub mod broker;

/// Simple and transactional produce senders.
mod sender;

/// Commits and aborts prepared transactions.
pub mod committer;

/// The sink writer.
pub mod writer;

pub use committer::SinkCommitter;
pub use config::{Semantics, SinkConfig};
pub use record::{Row, RowType};
pub use state::{CommitToken, SinkState, TransactionId};
pub use writer::{SinkContext, SinkWriter};
