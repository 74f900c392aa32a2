//! Drop-directory discovery.
//!
//! A polling scanner that turns directory changes into `FileAdded` /
//! `FileRemoved` events on the scheduler channel. Polling keeps the
//! collaborator dumb on purpose; the scheduler tolerates duplicate and
//! stale reports, so a missed poll costs nothing but latency.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::pipeline::Event;

/// Files the pipeline cares about: not hidden, `.stl` extension.
pub fn is_candidate(name: &str) -> bool {
    if name.starts_with('.') {
        return false;
    }
    let lower = name.to_lowercase();
    lower.ends_with(".stl")
}

/// List candidate files in the drop directory, sorted by name.
pub fn scan(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_candidate(&name) {
            entries.push((name, entry.path()));
        }
    }
    entries.sort();
    Ok(entries)
}

/// Poll `dir` forever, emitting add/remove events for candidate files.
/// `seed` is the listing already reconciled at startup, so known files do
/// not get re-announced.
pub fn spawn_watcher(
    dir: PathBuf,
    poll_interval: Duration,
    seed: &[(String, PathBuf)],
    tx: UnboundedSender<Event>,
) {
    let mut known: BTreeSet<String> = seed.iter().map(|(name, _)| name.clone()).collect();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;
            let listing = match scan(&dir) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("could not scan drop directory {}: {e}", dir.display());
                    continue;
                }
            };
            let current: BTreeSet<String> =
                listing.iter().map(|(name, _)| name.clone()).collect();

            for name in known.difference(&current) {
                if tx
                    .send(Event::FileRemoved {
                        filename: name.clone(),
                    })
                    .is_err()
                {
                    return;
                }
            }
            for (name, path) in &listing {
                if !known.contains(name)
                    && tx
                        .send(Event::FileAdded {
                            filename: name.clone(),
                            path: path.clone(),
                        })
                        .is_err()
                {
                    return;
                }
            }
            known = current;
        }
    });
}
