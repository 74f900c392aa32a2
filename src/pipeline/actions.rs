//! The action executor: one dispatchable action per pipeline stage.
//!
//! Each remote action is spawned as a task that calls the [`RemoteApi`]
//! client and sends an [`ActionOutcome`] event back to the scheduler loop;
//! the executor itself never touches the queues after dispatch. `Tidy` is
//! the exception: it is local and synchronous.
//!
//! The `in_progress` / `success` / `failure` status mapping per action is
//! the pipeline's transition table; every legal transition is listed here
//! and nowhere else.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::remote::{NewRecord, RemoteApi, RemoteError, UploadSlot};

use super::item::{Status, WorkItem};
use super::scheduler::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    RequestUpload,
    Upload,
    Finalize,
    Publish,
    Collect,
    Tidy,
}

impl Action {
    /// Status set at dispatch, while the call is outstanding.
    pub fn in_progress_status(self) -> Status {
        match self {
            Action::Create => Status::Creating,
            Action::RequestUpload => Status::RequestingUpload,
            Action::Upload => Status::Uploading,
            Action::Finalize => Status::Finalizing,
            Action::Publish => Status::Publishing,
            Action::Collect => Status::Collecting,
            Action::Tidy => Status::Collected,
        }
    }

    /// Status set when the call succeeds.
    pub fn success_status(self) -> Status {
        match self {
            Action::Create => Status::Created,
            Action::RequestUpload => Status::PendingUpload,
            Action::Upload => Status::Uploaded,
            Action::Finalize => Status::Finalized,
            Action::Publish => Status::Published,
            Action::Collect => Status::Collected,
            Action::Tidy => Status::Tidied,
        }
    }

    /// Status set when the call fails.
    pub fn failure_status(self) -> Status {
        match self {
            Action::Create => Status::FailedCreation,
            Action::RequestUpload => Status::FailedRequest,
            Action::Upload => Status::FailedUpload,
            Action::Finalize => Status::FailedFinalize,
            Action::Publish => Status::FailedPublish,
            Action::Collect => Status::FailedCollect,
            Action::Tidy => Status::Collected,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::RequestUpload => write!(f, "request_upload"),
            Action::Upload => write!(f, "upload"),
            Action::Finalize => write!(f, "finalize"),
            Action::Publish => write!(f, "publish"),
            Action::Collect => write!(f, "collect"),
            Action::Tidy => write!(f, "tidy"),
        }
    }
}

/// Fields a successful action merges back into its work item.
#[derive(Debug, Default)]
pub struct ActionPayload {
    pub remote_id: Option<u64>,
    pub slot: Option<UploadSlot>,
}

/// Completion report delivered back onto the scheduler loop.
#[derive(Debug)]
pub struct ActionOutcome {
    pub filename: String,
    pub action: Action,
    pub result: Result<ActionPayload, RemoteError>,
}

pub struct ActionExecutor<C> {
    client: Arc<C>,
    tx: UnboundedSender<Event>,
    /// Template for new records; the item's name overrides `name`.
    record_defaults: NewRecord,
    /// When false, the publish stage is skipped straight to `published`.
    publish_enabled: bool,
    /// Collection to add published records to; `None` skips the stage.
    collection_id: Option<String>,
    /// Where tidied source files are moved; `None` makes tidy a no-op.
    complete_dir: Option<PathBuf>,
}

impl<C: RemoteApi + 'static> ActionExecutor<C> {
    pub fn new(
        client: Arc<C>,
        tx: UnboundedSender<Event>,
        record_defaults: NewRecord,
        publish_enabled: bool,
        collection_id: Option<String>,
        complete_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            tx,
            record_defaults,
            publish_enabled,
            collection_id,
            complete_dir,
        }
    }

    /// Dispatch one action for the item. Sets the in-progress status and
    /// spawns the remote call; the completion event is applied by the
    /// scheduler on a later tick. Exactly one action per item may be
    /// outstanding; the caller enforces that via the in-flight statuses.
    pub fn perform(&self, action: Action, item: &mut WorkItem) {
        match action {
            Action::Create => self.create(item),
            Action::RequestUpload => self.request_upload(item),
            Action::Upload => self.upload(item),
            Action::Finalize => self.finalize(item),
            Action::Publish => self.publish(item),
            Action::Collect => self.collect(item),
            Action::Tidy => self.tidy(item),
        }
    }

    fn create(&self, item: &mut WorkItem) {
        item.set_status(Status::Creating);
        info!("creating \"{}\"", item.name);
        let record = NewRecord {
            name: item.name.clone(),
            ..self.record_defaults.clone()
        };
        let client = self.client.clone();
        self.deliver(item, Action::Create, async move {
            let created = client.create_record(&record).await?;
            Ok(ActionPayload {
                remote_id: Some(created.id),
                slot: None,
            })
        });
    }

    fn request_upload(&self, item: &mut WorkItem) {
        let Some(id) = item.remote_id else {
            warn!("\"{}\" has no remote id, cannot request upload", item.name);
            item.failures += 1;
            item.set_status(Status::FailedRequest);
            return;
        };
        item.set_status(Status::RequestingUpload);
        let filename = item.sane_name.clone();
        let client = self.client.clone();
        self.deliver(item, Action::RequestUpload, async move {
            let slot = client.request_upload(id, &filename).await?;
            Ok(ActionPayload {
                remote_id: None,
                slot: Some(slot),
            })
        });
    }

    fn upload(&self, item: &mut WorkItem) {
        let Some(slot) = item.slot.clone() else {
            warn!("\"{}\" has no upload slot, cannot upload", item.name);
            item.failures += 1;
            item.set_status(Status::FailedUpload);
            return;
        };
        item.set_status(Status::Uploading);
        let path = item.path.clone();
        let client = self.client.clone();
        self.deliver(item, Action::Upload, async move {
            client.upload_file(&slot, &path).await?;
            Ok(ActionPayload::default())
        });
    }

    fn finalize(&self, item: &mut WorkItem) {
        let url = match item.slot.as_ref().and_then(|slot| slot.finalize_url()) {
            Some(url) => url.to_string(),
            None => {
                warn!("\"{}\" has no finalize URL in its slot", item.name);
                item.failures += 1;
                item.set_status(Status::FailedFinalize);
                return;
            }
        };
        item.set_status(Status::Finalizing);
        let client = self.client.clone();
        self.deliver(item, Action::Finalize, async move {
            client.finalize_upload(&url).await?;
            Ok(ActionPayload::default())
        });
    }

    fn publish(&self, item: &mut WorkItem) {
        // Not configured to publish: skip straight to the end status.
        if !self.publish_enabled {
            item.set_status(Status::Published);
            return;
        }
        let Some(id) = item.remote_id else {
            warn!("\"{}\" has no remote id, cannot publish", item.name);
            item.failures += 1;
            item.set_status(Status::FailedPublish);
            return;
        };
        item.set_status(Status::Publishing);
        let client = self.client.clone();
        self.deliver(item, Action::Publish, async move {
            client.publish_record(id).await?;
            Ok(ActionPayload::default())
        });
    }

    fn collect(&self, item: &mut WorkItem) {
        // No collection configured: skip straight to the end status.
        let Some(collection_id) = self.collection_id.clone() else {
            item.set_status(Status::Collected);
            return;
        };
        let Some(id) = item.remote_id else {
            warn!("\"{}\" has no remote id, cannot collect", item.name);
            item.failures += 1;
            item.set_status(Status::FailedCollect);
            return;
        };
        item.set_status(Status::Collecting);
        let client = self.client.clone();
        self.deliver(item, Action::Collect, async move {
            client.add_to_collection(id, &collection_id).await?;
            Ok(ActionPayload::default())
        });
    }

    /// Move the finished source file into the complete directory, renamed
    /// with its remote id. Local and synchronous. A failed move leaves the
    /// item at `collected` so a later tick can retry it.
    fn tidy(&self, item: &mut WorkItem) {
        let Some(dir) = &self.complete_dir else {
            item.set_status(Status::Tidied);
            return;
        };
        let ext = item
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stl".to_string());
        let id = item.remote_id.unwrap_or(0);
        let dest = dir.join(format!("{}.{}.{}", item.name, id, ext));
        match std::fs::rename(&item.path, &dest) {
            Ok(()) => {
                info!("completed \"{}\" : {id}", item.name);
                item.set_status(Status::Tidied);
            }
            Err(e) => {
                warn!(
                    "could not move \"{}\" to {}: {e}",
                    item.name,
                    dest.display()
                );
            }
        }
    }

    /// Spawn the remote call and route its outcome back onto the loop.
    fn deliver<F>(&self, item: &WorkItem, action: Action, fut: F)
    where
        F: Future<Output = Result<ActionPayload, RemoteError>> + Send + 'static,
    {
        let filename = item.filename.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fut.await;
            let _ = tx.send(Event::ActionDone(ActionOutcome {
                filename,
                action,
                result,
            }));
        });
    }
}
