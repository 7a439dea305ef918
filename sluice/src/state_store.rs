use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sluice_core::SinkState;
use sluice_core::state::{decode_states, encode_states};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Keeps the sink states of the last checkpoint in a file.
#[derive(Debug, Clone)]
pub(crate) struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// States of the last checkpoint. A missing file means a fresh start.
    pub(crate) async fn load(&self) -> Result<Vec<SinkState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let states = decode_states(&bytes)?;
                info!(path = %self.path.display(), states = states.len(), "Loaded sink states");
                Ok(states)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No sink states found, starting fresh");
                Ok(Vec::new())
            }
            Err(e) => Err(Error::StateStore(format!(
                "reading {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Replaces the stored states. The file is written next to the target and
    /// renamed over it, so a crash never leaves a partial file behind.
    pub(crate) async fn save(&self, states: &[SinkState]) -> Result<()> {
        let bytes = encode_states(states)?;
        let staging = PathBuf::from(format!("{}.tmp", self.path.display()));

        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| Error::StateStore(format!("writing {}: {e}", staging.display())))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| Error::StateStore(format!("renaming {}: {e}", staging.display())))?;

        debug!(path = %self.path.display(), states = states.len(), "Saved sink states");
        Ok(())
    }
}
