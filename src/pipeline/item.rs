//! Work items and stage queues.
//!
//! A [`WorkItem`] tracks one dropped file through the pipeline:
//!
//! ```text
//! new → creating → created → requesting_upload → pending_upload → uploading
//!     → uploaded → finalizing → finalized → publishing → published
//!     → collecting → collected → tidied
//! ```
//!
//! Each remote stage also has a failure status (`failed_creation`,
//! `failed_upload`, ...) that the heartbeat retries from. Items live in one
//! of three stage queues — create, upload, publish — and migrate forward as
//! they reach each queue's success status.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::UploadSlot;

/// Every status a work item can carry. The serialized tag is the snapshot
/// vocabulary, so renaming a variant is a snapshot format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    New,
    Creating,
    Created,
    FailedCreation,
    RequestingUpload,
    PendingUpload,
    FailedRequest,
    Uploading,
    Uploaded,
    FailedUpload,
    Finalizing,
    Finalized,
    FailedFinalize,
    Publishing,
    Published,
    FailedPublish,
    Collecting,
    Collected,
    FailedCollect,
    Tidied,
    Deleted,
}

impl Status {
    /// True while an async action dispatched on a previous tick is still
    /// outstanding. These count toward the in-flight budget and must never
    /// get a second dispatch.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Status::Creating
                | Status::RequestingUpload
                | Status::Uploading
                | Status::Finalizing
                | Status::Publishing
                | Status::Collecting
        )
    }

    /// The failure status a stale in-flight status collapses to when a
    /// snapshot from a dead process is loaded. No execution survives a
    /// restart, so the action is pessimistically treated as failed.
    pub fn reclassify_stale(self) -> Status {
        match self {
            Status::Creating => Status::FailedCreation,
            Status::RequestingUpload => Status::FailedRequest,
            Status::Uploading => Status::FailedUpload,
            Status::Finalizing => Status::FailedFinalize,
            Status::Publishing => Status::FailedPublish,
            Status::Collecting => Status::FailedCollect,
            other => other,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Status::New => "new",
            Status::Creating => "creating",
            Status::Created => "created",
            Status::FailedCreation => "failed_creation",
            Status::RequestingUpload => "requesting_upload",
            Status::PendingUpload => "pending_upload",
            Status::FailedRequest => "failed_request",
            Status::Uploading => "uploading",
            Status::Uploaded => "uploaded",
            Status::FailedUpload => "failed_upload",
            Status::Finalizing => "finalizing",
            Status::Finalized => "finalized",
            Status::FailedFinalize => "failed_finalize",
            Status::Publishing => "publishing",
            Status::Published => "published",
            Status::FailedPublish => "failed_publish",
            Status::Collecting => "collecting",
            Status::Collected => "collected",
            Status::FailedCollect => "failed_collect",
            Status::Tidied => "tidied",
            Status::Deleted => "deleted",
        };
        write!(f, "{tag}")
    }
}

/// One file's tracked journey through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Original filename in the drop directory; the stable key.
    pub filename: String,
    /// Display name: the filename stem.
    pub name: String,
    /// Sanitized filename sent with the upload-slot request.
    pub sane_name: String,
    pub path: PathBuf,
    pub status: Status,
    pub failures: u32,
    /// Identifier assigned by the service once creation succeeds.
    pub remote_id: Option<u64>,
    /// Upload slot granted by the service; present from `pending_upload` on.
    pub slot: Option<UploadSlot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(filename: String, path: PathBuf) -> Self {
        let now = Utc::now();
        let name = display_name(&filename);
        let sane_name = sanitize_filename(&filename);
        Self {
            filename,
            name,
            sane_name,
            path,
            status: Status::New,
            failures: 0,
            remote_id: None,
            slot: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Filename stem, up to the first `.stl`/`.STL` suffix.
fn display_name(filename: &str) -> String {
    let lower = filename.to_lowercase();
    match lower.find(".stl") {
        Some(pos) => filename[..pos].to_string(),
        None => filename.to_string(),
    }
}

/// Strip anything the storage backend might choke on. Keeps alphanumerics
/// and `!'_-.*()`; a name that sanitizes down to a bare extension becomes
/// `nofilename.stl`.
pub fn sanitize_filename(filename: &str) -> String {
    let sane: String = filename
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "!'_-.*()".contains(*c))
        .collect();
    let stem_empty = sane
        .rfind('.')
        .map(|pos| sane[..pos].is_empty())
        .unwrap_or(sane.is_empty());
    if stem_empty {
        "nofilename.stl".to_string()
    } else {
        sane
    }
}

/// Which stage queue an item sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Create,
    Upload,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Create => write!(f, "create"),
            Stage::Upload => write!(f, "upload"),
            Stage::Publish => write!(f, "publish"),
        }
    }
}

/// The three stage queues. This struct *is* the persisted snapshot shape:
/// a mapping from stage name to an ordered sequence of item records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Queues {
    pub create: Vec<WorkItem>,
    pub upload: Vec<WorkItem>,
    pub publish: Vec<WorkItem>,
}

impl Queues {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.upload.is_empty() && self.publish.is_empty()
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.upload.len() + self.publish.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.create
            .iter()
            .chain(self.upload.iter())
            .chain(self.publish.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkItem> {
        self.create
            .iter_mut()
            .chain(self.upload.iter_mut())
            .chain(self.publish.iter_mut())
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.iter().any(|item| item.filename == filename)
    }

    pub fn find_mut(&mut self, filename: &str) -> Option<&mut WorkItem> {
        self.iter_mut().find(|item| item.filename == filename)
    }

    /// Items with an action currently outstanding, across all queues.
    pub fn in_flight_count(&self) -> usize {
        self.iter().filter(|item| item.status.is_in_flight()).count()
    }

    /// Remove an item by filename from whichever queue holds it.
    pub fn remove(&mut self, filename: &str) -> Option<WorkItem> {
        for queue in [&mut self.create, &mut self.upload, &mut self.publish] {
            if let Some(pos) = queue.iter().position(|item| item.filename == filename) {
                return Some(queue.remove(pos));
            }
        }
        None
    }
}
