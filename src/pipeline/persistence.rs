//! Snapshot persistence for the stage queues.
//!
//! The scheduler writes one snapshot per tick, fire-and-forget; a failed
//! write is logged and the next tick tries again. Loading is tolerant: a
//! missing, unreadable, or misshapen snapshot yields an empty pipeline and a
//! warning, never a startup failure.

use std::path::PathBuf;

use tracing::{debug, error, warn};

use super::item::Queues;

pub struct SnapshotStore {
    path: Option<PathBuf>,
}

impl SnapshotStore {
    /// `None` disables persistence entirely (state lives only in memory).
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Serialize the queues and hand the bytes to a background write.
    pub fn save(&self, queues: &Queues) {
        let Some(path) = &self.path else { return };
        let json = match serde_json::to_string_pretty(queues) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize queue snapshot: {e}");
                return;
            }
        };
        let path = path.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::write(&path, json).await {
                error!("failed to save queue snapshot to {}: {e}", path.display());
            }
        });
    }

    /// Load the previous snapshot, if one exists and parses.
    pub fn load(&self) -> Option<Queues> {
        let path = self.path.as_ref()?;
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no queue snapshot at {}, starting empty", path.display());
                return None;
            }
            Err(e) => {
                warn!("could not read queue snapshot {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str::<Queues>(&contents) {
            Ok(queues) => {
                debug!("loaded {} queued item(s) from snapshot", queues.len());
                Some(queues)
            }
            Err(e) => {
                warn!(
                    "discarding malformed queue snapshot {}: {e}",
                    path.display()
                );
                None
            }
        }
    }
}
