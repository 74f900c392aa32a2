//! The heartbeat scheduler: a single-owner loop that drives every work item
//! through the pipeline.
//!
//! All queue and connection mutations happen on one task, either inside the
//! periodic [`Scheduler::tick`] or inside [`Scheduler::handle`] for a
//! completion event delivered over the channel. Dispatched actions run as
//! spawned tasks and report back through the same channel, so nothing here
//! needs a lock.
//!
//! Per tick, queues are processed in precedence order (create → upload →
//! publish) under one shared in-flight budget. The budget is seeded by
//! counting every in-flight status across all queues up front, so the number
//! of outstanding actions never exceeds the configured pool regardless of
//! which queue they sit in.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::notify::Notifier;
use crate::remote::{ConnectionManager, Directive, NewRecord, RemoteApi, RemoteError, UserInfo};

use super::actions::{Action, ActionExecutor, ActionOutcome};
use super::item::{Queues, Stage, Status, WorkItem};
use super::persistence::SnapshotStore;

/// Default heartbeat interval, deliberately coarser than the minimum
/// reconnection backoff.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1500);

/// Everything delivered back onto the scheduler loop.
#[derive(Debug)]
pub enum Event {
    FileAdded { filename: String, path: PathBuf },
    FileRemoved { filename: String },
    ActionDone(ActionOutcome),
    CheckDone(Result<UserInfo, RemoteError>),
    RetryCheck,
}

/// Pipeline knobs, extracted from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Upper bound on concurrently outstanding remote actions.
    pub connection_pool: usize,
    /// Consecutive failures of one stage before escalating to redo the
    /// previous dependency.
    pub max_failures: u32,
    pub record_defaults: NewRecord,
    pub publish_enabled: bool,
    pub collection_id: Option<String>,
    pub complete_dir: Option<PathBuf>,
}

pub struct Scheduler<C, N> {
    queues: Queues,
    executor: ActionExecutor<C>,
    client: Arc<C>,
    notifier: N,
    conn: ConnectionManager,
    store: SnapshotStore,
    pool: usize,
    max_failures: u32,
    tx: UnboundedSender<Event>,
    /// One unreachable notification per outage, cleared on reconnect.
    outage_notified: bool,
}

impl<C: RemoteApi + 'static, N: Notifier> Scheduler<C, N> {
    /// Build a scheduler around previously loaded queues. Returns the event
    /// receiver the caller feeds into [`Scheduler::run`]; the matching
    /// sender is cloned into the discovery watcher via [`Scheduler::sender`].
    pub fn new(
        client: Arc<C>,
        notifier: N,
        store: SnapshotStore,
        queues: Queues,
        settings: PipelineSettings,
    ) -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = ActionExecutor::new(
            client.clone(),
            tx.clone(),
            settings.record_defaults,
            settings.publish_enabled,
            settings.collection_id,
            settings.complete_dir,
        );
        let scheduler = Self {
            queues,
            executor,
            client,
            notifier,
            conn: ConnectionManager::new(),
            store,
            pool: settings.connection_pool,
            max_failures: settings.max_failures,
            tx,
            outage_notified: false,
        };
        (scheduler, rx)
    }

    pub fn sender(&self) -> UnboundedSender<Event> {
        self.tx.clone()
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// Startup pass, run once before the first tick.
    ///
    /// Any in-flight status loaded from a snapshot belongs to a process that
    /// no longer exists, so it is reclassified as failed (failure counters
    /// untouched). Then the queues are reconciled against the current drop
    /// directory listing: files that vanished while we were down are
    /// removed, files that appeared are enqueued.
    pub fn recover(&mut self, listing: &[(String, PathBuf)]) {
        for item in self.queues.iter_mut() {
            let stale = item.status;
            let reclassified = stale.reclassify_stale();
            if stale != reclassified {
                warn!(
                    "\"{}\" was {stale} when the process died, marking {reclassified}",
                    item.name
                );
                item.set_status(reclassified);
            }
        }

        let removed: Vec<String> = self
            .queues
            .iter()
            .filter(|item| !listing.iter().any(|(name, _)| *name == item.filename))
            .map(|item| item.filename.clone())
            .collect();
        for filename in removed {
            self.handle_file_removed(&filename);
        }
        for (filename, path) in listing {
            if !self.queues.contains(filename) {
                self.handle_file_added(filename.clone(), path.clone());
            }
        }
    }

    /// Kick off the initial connectivity probe.
    pub fn connect(&mut self) {
        self.start_check();
    }

    /// Run the loop forever: fixed-interval ticks plus completion events.
    pub async fn run(mut self, mut rx: UnboundedReceiver<Event>, tick_interval: Duration) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                Some(event) = rx.recv() => self.handle(event),
            }
        }
    }

    /// One heartbeat. Never blocks on the network: dispatching hands the
    /// call to a spawned task and the status mutation arrives later as an
    /// [`Event::ActionDone`].
    pub fn tick(&mut self) {
        if !self.conn.gate_open() {
            // Outage: completed-but-untidied work is the only thing still
            // worth advancing, everything else waits for the gate.
            self.drain_tidyable();
            self.store.save(&self.queues);
            return;
        }

        let mut in_flight = self.queues.in_flight_count();
        self.tick_create(&mut in_flight);
        self.tick_upload(&mut in_flight);
        self.tick_publish(&mut in_flight);

        self.store.save(&self.queues);
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::FileAdded { filename, path } => self.handle_file_added(filename, path),
            Event::FileRemoved { filename } => self.handle_file_removed(&filename),
            Event::ActionDone(outcome) => self.apply_outcome(outcome),
            Event::CheckDone(result) => self.apply_check(result),
            Event::RetryCheck => {
                self.conn.retry_fired();
                self.start_check();
            }
        }
    }

    fn tick_create(&mut self, in_flight: &mut usize) {
        let mut i = 0;
        while i < self.queues.create.len() {
            match self.queues.create[i].status {
                Status::New | Status::FailedCreation => {
                    self.dispatch(Action::Create, Stage::Create, i, in_flight);
                }
                Status::Created => {
                    let item = self.queues.create.remove(i);
                    self.queues.upload.push(item);
                    continue;
                }
                Status::Deleted => {
                    self.queues.create.remove(i);
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn tick_upload(&mut self, in_flight: &mut usize) {
        let mut i = 0;
        while i < self.queues.upload.len() {
            match self.queues.upload[i].status {
                Status::Created | Status::FailedRequest => {
                    self.dispatch(Action::RequestUpload, Stage::Upload, i, in_flight);
                }
                Status::PendingUpload => {
                    self.dispatch(Action::Upload, Stage::Upload, i, in_flight);
                }
                Status::FailedUpload => {
                    if self.queues.upload[i].failures > self.max_failures {
                        // Repeated upload failures suggest the slot itself
                        // went stale; request a fresh one.
                        self.dispatch(Action::RequestUpload, Stage::Upload, i, in_flight);
                    } else {
                        self.dispatch(Action::Upload, Stage::Upload, i, in_flight);
                    }
                }
                Status::Uploaded => {
                    let item = self.queues.upload.remove(i);
                    self.queues.publish.push(item);
                    continue;
                }
                Status::Deleted => {
                    self.queues.upload.remove(i);
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn tick_publish(&mut self, in_flight: &mut usize) {
        let mut i = 0;
        while i < self.queues.publish.len() {
            match self.queues.publish[i].status {
                Status::Uploaded => {
                    self.dispatch(Action::Finalize, Stage::Publish, i, in_flight);
                }
                Status::FailedFinalize => {
                    if self.queues.publish[i].failures > self.max_failures {
                        // The upload behind this finalize is suspect; send
                        // the item back for a fresh slot and a re-upload.
                        if *in_flight < self.pool {
                            self.dispatch(Action::RequestUpload, Stage::Publish, i, in_flight);
                            let item = self.queues.publish.remove(i);
                            self.queues.upload.push(item);
                            continue;
                        }
                    } else {
                        self.dispatch(Action::Finalize, Stage::Publish, i, in_flight);
                    }
                }
                Status::Finalized | Status::FailedPublish => {
                    self.dispatch(Action::Publish, Stage::Publish, i, in_flight);
                }
                Status::Published | Status::FailedCollect => {
                    self.dispatch(Action::Collect, Stage::Publish, i, in_flight);
                }
                Status::Collected => {
                    self.executor.perform(Action::Tidy, &mut self.queues.publish[i]);
                    if self.queues.publish[i].status == Status::Tidied {
                        self.queues.publish.remove(i);
                        continue;
                    }
                }
                Status::Tidied | Status::Deleted => {
                    self.queues.publish.remove(i);
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Dispatch `action` for the item at `queue[index]` if the shared budget
    /// allows. The budget only pays for dispatches that actually leave an
    /// action outstanding; skip-style actions (publish disabled, no
    /// collection) settle synchronously and cost nothing.
    fn dispatch(&mut self, action: Action, stage: Stage, index: usize, in_flight: &mut usize) {
        if *in_flight >= self.pool {
            return;
        }
        let item = match stage {
            Stage::Create => &mut self.queues.create[index],
            Stage::Upload => &mut self.queues.upload[index],
            Stage::Publish => &mut self.queues.publish[index],
        };
        self.executor.perform(action, item);
        if item.status.is_in_flight() {
            *in_flight += 1;
        }
    }

    fn drain_tidyable(&mut self) {
        let mut i = 0;
        while i < self.queues.publish.len() {
            if self.queues.publish[i].status == Status::Collected {
                self.executor.perform(Action::Tidy, &mut self.queues.publish[i]);
                if self.queues.publish[i].status == Status::Tidied {
                    self.queues.publish.remove(i);
                    continue;
                }
            }
            i += 1;
        }
    }

    fn handle_file_added(&mut self, filename: String, path: PathBuf) {
        // The watcher can double-report; an item per filename, once. A
        // re-announced known file just retargets the path.
        if let Some(item) = self.queues.find_mut(&filename) {
            item.path = path;
            return;
        }
        info!("file added:   {filename}");
        self.queues.create.push(WorkItem::new(filename, path));
    }

    fn handle_file_removed(&mut self, filename: &str) {
        debug!("file removed: {filename}");
        if let Some(mut item) = self.queues.remove(filename) {
            item.set_status(Status::Deleted);
            info!("removed \"{filename}\" with status {}", item.status);
        }
    }

    /// Merge an action completion into its work item. The item may have been
    /// removed while the call was in flight; its outcome is then dropped.
    /// The same filename may also have been re-dropped as a fresh item in
    /// the meantime, so only an item still waiting on this exact action
    /// accepts the outcome.
    fn apply_outcome(&mut self, outcome: ActionOutcome) {
        let Some(item) = self.queues.find_mut(&outcome.filename) else {
            debug!(
                "dropping {} outcome for vanished item {}",
                outcome.action, outcome.filename
            );
            return;
        };
        if item.status != outcome.action.in_progress_status() {
            debug!(
                "dropping stale {} outcome for {}: item is {} now",
                outcome.action, outcome.filename, item.status
            );
            return;
        }
        match outcome.result {
            Ok(payload) => {
                if let Some(id) = payload.remote_id {
                    item.remote_id = Some(id);
                }
                if let Some(slot) = payload.slot {
                    item.slot = Some(slot);
                }
                item.failures = 0;
                item.set_status(outcome.action.success_status());
                debug!("{} succeeded for \"{}\"", outcome.action, item.name);
                if outcome.action == Action::Create {
                    let (name, id) = (item.name.clone(), item.remote_id.unwrap_or(0));
                    info!("created \"{name}\" : {id}");
                    self.notifier.item_created(&name, id);
                }
            }
            Err(error) => {
                item.failures += 1;
                item.set_status(outcome.action.failure_status());
                warn!(
                    "{} failed for \"{}\" ({} time(s)): {error}",
                    outcome.action, item.name, item.failures
                );
                self.report_error(error);
            }
        }
    }

    fn apply_check(&mut self, result: Result<UserInfo, RemoteError>) {
        match result {
            Ok(user) => {
                info!("connected to publishing service as {}", user.name);
                self.conn.on_check_ok();
                self.outage_notified = false;
            }
            Err(error) => {
                warn!("connectivity check failed: {error}");
                self.report_error(error);
            }
        }
    }

    /// Feed an error to the connection manager and act on its directive.
    fn report_error(&mut self, error: RemoteError) {
        match self.conn.on_error(error.class()) {
            Directive::ScheduleRetry(delay) => {
                if !self.outage_notified {
                    self.outage_notified = true;
                    self.notifier.unreachable();
                }
                debug!("retrying connectivity check in {delay:?}");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::RetryCheck);
                });
            }
            Directive::Recheck => {
                warn!("credential rejected, discarding it; re-authentication required");
                self.client.invalidate_credentials();
                self.start_check();
            }
            Directive::Nothing => {}
        }
    }

    fn start_check(&self) {
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = client.current_user().await;
            let _ = tx.send(Event::CheckDone(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RecordCreated, UploadSlot};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

    /// In-memory publishing service. Failure counters burn down: a value of
    /// 2 makes the next two calls of that kind fail, then succeed.
    #[derive(Default)]
    struct MockRemote {
        next_id: AtomicU64,
        fail_create: AtomicU32,
        fail_upload: AtomicU32,
        unreachable: AtomicBool,
        unauthorized: AtomicBool,
        invalidated: AtomicBool,
        collected: Mutex<Vec<(u64, String)>>,
    }

    impl MockRemote {
        fn gate_error(&self) -> Option<RemoteError> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Some(RemoteError::Unreachable("mock outage".into()));
            }
            if self.unauthorized.load(Ordering::SeqCst) {
                return Some(RemoteError::Unauthorized { status: 401 });
            }
            None
        }

        fn burn(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl RemoteApi for MockRemote {
        async fn current_user(&self) -> Result<UserInfo, RemoteError> {
            if let Some(e) = self.gate_error() {
                return Err(e);
            }
            Ok(UserInfo {
                name: "maker".into(),
                id: Some(1),
            })
        }

        async fn create_record(&self, record: &NewRecord) -> Result<RecordCreated, RemoteError> {
            if let Some(e) = self.gate_error() {
                return Err(e);
            }
            if Self::burn(&self.fail_create) {
                return Err(RemoteError::Api {
                    status: 500,
                    message: "mock create failure".into(),
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RecordCreated {
                id,
                name: record.name.clone(),
            })
        }

        async fn request_upload(&self, _id: u64, filename: &str) -> Result<UploadSlot, RemoteError> {
            if let Some(e) = self.gate_error() {
                return Err(e);
            }
            Ok(UploadSlot {
                action: "https://storage.example.com/bucket".into(),
                fields: BTreeMap::from([
                    ("key".to_string(), format!("uploads/{filename}")),
                    (
                        "success_action_redirect".to_string(),
                        "https://api.example.com/finalize".to_string(),
                    ),
                ]),
            })
        }

        async fn upload_file(
            &self,
            _slot: &UploadSlot,
            _path: &std::path::Path,
        ) -> Result<(), RemoteError> {
            if let Some(e) = self.gate_error() {
                return Err(e);
            }
            if Self::burn(&self.fail_upload) {
                return Err(RemoteError::Api {
                    status: 500,
                    message: "mock upload failure".into(),
                });
            }
            Ok(())
        }

        async fn finalize_upload(&self, _url: &str) -> Result<(), RemoteError> {
            self.gate_error().map_or(Ok(()), Err)
        }

        async fn publish_record(&self, _id: u64) -> Result<(), RemoteError> {
            self.gate_error().map_or(Ok(()), Err)
        }

        async fn add_to_collection(
            &self,
            id: u64,
            collection_id: &str,
        ) -> Result<(), RemoteError> {
            if let Some(e) = self.gate_error() {
                return Err(e);
            }
            self.collected
                .lock()
                .unwrap()
                .push((id, collection_id.to_string()));
            Ok(())
        }

        fn invalidate_credentials(&self) {
            self.invalidated.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        created: Mutex<Vec<(String, u64)>>,
        unreachable_count: AtomicU32,
    }

    impl Notifier for RecordingNotifier {
        fn item_created(&self, name: &str, id: u64) {
            self.created.lock().unwrap().push((name.to_string(), id));
        }

        fn unreachable(&self) {
            self.unreachable_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    type TestScheduler = Scheduler<MockRemote, Arc<RecordingNotifier>>;

    fn settings(pool: usize) -> PipelineSettings {
        PipelineSettings {
            connection_pool: pool,
            max_failures: 3,
            record_defaults: NewRecord {
                name: String::new(),
                license: "cc".into(),
                category: "other".into(),
                description: "dropped".into(),
                is_wip: false,
                tags: vec![],
            },
            publish_enabled: true,
            collection_id: Some("987".into()),
            complete_dir: None,
        }
    }

    fn build(
        remote: Arc<MockRemote>,
        settings: PipelineSettings,
    ) -> (TestScheduler, UnboundedReceiver<Event>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let (scheduler, rx) = Scheduler::new(
            remote,
            notifier.clone(),
            SnapshotStore::new(None),
            Queues::default(),
            settings,
        );
        (scheduler, rx, notifier)
    }

    fn open_gate(scheduler: &mut TestScheduler) {
        scheduler.handle(Event::CheckDone(Ok(UserInfo {
            name: "maker".into(),
            id: Some(1),
        })));
    }

    fn item_with(filename: &str, status: Status, failures: u32) -> WorkItem {
        let mut item = WorkItem::new(filename.into(), PathBuf::from(format!("/drop/{filename}")));
        item.status = status;
        item.failures = failures;
        item.remote_id = Some(11);
        item.slot = Some(UploadSlot {
            action: "https://storage.example.com/bucket".into(),
            fields: BTreeMap::from([(
                "success_action_redirect".to_string(),
                "https://api.example.com/finalize".to_string(),
            )]),
        });
        item
    }

    /// Let spawned action tasks finish and feed their outcomes back in.
    async fn settle(scheduler: &mut TestScheduler, rx: &mut UnboundedReceiver<Event>) {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            while let Ok(event) = rx.try_recv() {
                scheduler.handle(event);
            }
        }
    }

    #[tokio::test]
    async fn file_added_enqueues_once() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        scheduler.handle(Event::FileAdded {
            filename: "cube.stl".into(),
            path: PathBuf::from("/drop/cube.stl"),
        });
        scheduler.handle(Event::FileAdded {
            filename: "cube.stl".into(),
            path: PathBuf::from("/drop/cube.stl"),
        });
        assert_eq!(scheduler.queues().create.len(), 1);
        assert_eq!(scheduler.queues().create[0].status, Status::New);
    }

    #[tokio::test]
    async fn file_removed_drops_item_from_any_queue() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        scheduler
            .queues
            .publish
            .push(item_with("cube.stl", Status::Finalized, 0));
        scheduler.handle(Event::FileRemoved {
            filename: "cube.stl".into(),
        });
        assert!(scheduler.queues().is_empty());
    }

    #[tokio::test]
    async fn tick_respects_connection_pool() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(2));
        open_gate(&mut scheduler);
        for i in 0..5 {
            scheduler.handle(Event::FileAdded {
                filename: format!("part{i}.stl"),
                path: PathBuf::from(format!("/drop/part{i}.stl")),
            });
        }

        scheduler.tick();

        let creating = scheduler
            .queues()
            .create
            .iter()
            .filter(|item| item.status == Status::Creating)
            .count();
        let waiting = scheduler
            .queues()
            .create
            .iter()
            .filter(|item| item.status == Status::New)
            .count();
        assert_eq!(creating, 2);
        assert_eq!(waiting, 3);
    }

    #[tokio::test]
    async fn budget_counts_in_flight_across_all_queues() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(2));
        open_gate(&mut scheduler);
        scheduler
            .queues
            .publish
            .push(item_with("a.stl", Status::Finalizing, 0));
        scheduler
            .queues
            .publish
            .push(item_with("b.stl", Status::Publishing, 0));
        scheduler.handle(Event::FileAdded {
            filename: "c.stl".into(),
            path: PathBuf::from("/drop/c.stl"),
        });

        scheduler.tick();

        // Two actions already outstanding in the publish queue: the create
        // queue gets nothing this tick.
        assert_eq!(scheduler.queues().create[0].status, Status::New);
        assert!(scheduler.queues().in_flight_count() <= 2);
    }

    #[tokio::test]
    async fn end_to_end_cube_reaches_tidied_and_leaves_queues() {
        let drop_dir = tempfile::tempdir().unwrap();
        let complete_dir = tempfile::tempdir().unwrap();
        let source = drop_dir.path().join("cube.stl");
        std::fs::write(&source, b"solid cube").unwrap();

        let remote = Arc::new(MockRemote::default());
        let mut config = settings(3);
        config.complete_dir = Some(complete_dir.path().to_path_buf());
        let (mut scheduler, mut rx, notifier) = build(remote.clone(), config);
        open_gate(&mut scheduler);
        scheduler.handle(Event::FileAdded {
            filename: "cube.stl".into(),
            path: source.clone(),
        });

        for _ in 0..20 {
            scheduler.tick();
            settle(&mut scheduler, &mut rx).await;
            if scheduler.queues().is_empty() {
                break;
            }
        }

        assert!(scheduler.queues().is_empty(), "pipeline did not drain");
        assert!(!source.exists());
        assert!(complete_dir.path().join("cube.1.stl").exists());
        assert_eq!(
            notifier.created.lock().unwrap().as_slice(),
            &[("cube".to_string(), 1)]
        );
        assert_eq!(remote.collected.lock().unwrap().as_slice(), &[(1, "987".to_string())]);
    }

    #[tokio::test]
    async fn failure_increments_counter_and_success_resets_it() {
        let remote = Arc::new(MockRemote::default());
        remote.fail_create.store(1, Ordering::SeqCst);
        let (mut scheduler, mut rx, _) = build(remote, settings(3));
        open_gate(&mut scheduler);
        scheduler.handle(Event::FileAdded {
            filename: "cube.stl".into(),
            path: PathBuf::from("/drop/cube.stl"),
        });

        scheduler.tick();
        settle(&mut scheduler, &mut rx).await;
        assert_eq!(scheduler.queues().create[0].status, Status::FailedCreation);
        assert_eq!(scheduler.queues().create[0].failures, 1);

        scheduler.tick();
        settle(&mut scheduler, &mut rx).await;
        let item = scheduler.queues().iter().next().unwrap();
        assert_eq!(item.failures, 0);
        assert_eq!(item.remote_id, Some(1));
    }

    #[tokio::test]
    async fn missing_precondition_still_counts_as_failure() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        open_gate(&mut scheduler);
        // A partial snapshot can leave an item past creation without its
        // remote id; the guard failure must advance the counter so the item
        // is not redispatched forever at zero.
        let mut item = WorkItem::new("cube.stl".into(), PathBuf::from("/drop/cube.stl"));
        item.status = Status::Created;
        scheduler.queues.upload.push(item);

        scheduler.tick();
        assert_eq!(scheduler.queues().upload[0].status, Status::FailedRequest);
        assert_eq!(scheduler.queues().upload[0].failures, 1);

        scheduler.tick();
        assert_eq!(scheduler.queues().upload[0].failures, 2);
    }

    #[tokio::test]
    async fn upload_failures_past_ceiling_request_fresh_slot() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        open_gate(&mut scheduler);
        scheduler
            .queues
            .upload
            .push(item_with("cube.stl", Status::FailedUpload, 4));

        scheduler.tick();

        assert_eq!(
            scheduler.queues().upload[0].status,
            Status::RequestingUpload
        );
    }

    #[tokio::test]
    async fn upload_failures_below_ceiling_retry_in_place() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        open_gate(&mut scheduler);
        scheduler
            .queues
            .upload
            .push(item_with("cube.stl", Status::FailedUpload, 2));

        scheduler.tick();

        assert_eq!(scheduler.queues().upload[0].status, Status::Uploading);
    }

    #[tokio::test]
    async fn finalize_failures_past_ceiling_escalate_to_upload_queue() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        open_gate(&mut scheduler);
        scheduler
            .queues
            .publish
            .push(item_with("cube.stl", Status::FailedFinalize, 4));

        scheduler.tick();

        assert!(scheduler.queues().publish.is_empty());
        assert_eq!(scheduler.queues().upload.len(), 1);
        assert_eq!(
            scheduler.queues().upload[0].status,
            Status::RequestingUpload
        );
    }

    #[tokio::test]
    async fn closed_gate_freezes_everything_but_tidy() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        // Gate starts closed; no check has succeeded yet.
        scheduler.handle(Event::FileAdded {
            filename: "new.stl".into(),
            path: PathBuf::from("/drop/new.stl"),
        });
        scheduler
            .queues
            .upload
            .push(item_with("waiting.stl", Status::PendingUpload, 0));
        // No complete dir configured: tidy is a no-op that still finishes.
        scheduler
            .queues
            .publish
            .push(item_with("done.stl", Status::Collected, 0));

        scheduler.tick();

        assert_eq!(scheduler.queues().create[0].status, Status::New);
        assert_eq!(scheduler.queues().upload[0].status, Status::PendingUpload);
        assert!(scheduler.queues().publish.is_empty());
    }

    #[tokio::test]
    async fn reconnection_resumes_dispatching() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        scheduler.handle(Event::FileAdded {
            filename: "cube.stl".into(),
            path: PathBuf::from("/drop/cube.stl"),
        });
        scheduler.tick();
        assert_eq!(scheduler.queues().create[0].status, Status::New);

        open_gate(&mut scheduler);
        scheduler.tick();
        assert_eq!(scheduler.queues().create[0].status, Status::Creating);
    }

    #[tokio::test]
    async fn recovery_reclassifies_stale_in_flight_statuses() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        scheduler
            .queues
            .create
            .push(item_with("a.stl", Status::Creating, 2));
        scheduler
            .queues
            .upload
            .push(item_with("b.stl", Status::Uploading, 0));
        scheduler
            .queues
            .publish
            .push(item_with("c.stl", Status::Collecting, 1));

        let listing = vec![
            ("a.stl".to_string(), PathBuf::from("/drop/a.stl")),
            ("b.stl".to_string(), PathBuf::from("/drop/b.stl")),
            ("c.stl".to_string(), PathBuf::from("/drop/c.stl")),
        ];
        scheduler.recover(&listing);

        assert_eq!(scheduler.queues().create[0].status, Status::FailedCreation);
        assert_eq!(scheduler.queues().create[0].failures, 2);
        assert_eq!(scheduler.queues().upload[0].status, Status::FailedUpload);
        assert_eq!(scheduler.queues().publish[0].status, Status::FailedCollect);
        assert_eq!(scheduler.queues().publish[0].failures, 1);
    }

    #[tokio::test]
    async fn recovery_reconciles_queues_against_directory() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        scheduler
            .queues
            .create
            .push(item_with("a.stl", Status::New, 0));
        scheduler
            .queues
            .upload
            .push(item_with("b.stl", Status::PendingUpload, 0));

        // A vanished while we were down; C appeared.
        let listing = vec![
            ("b.stl".to_string(), PathBuf::from("/drop/b.stl")),
            ("c.stl".to_string(), PathBuf::from("/drop/c.stl")),
        ];
        scheduler.recover(&listing);

        assert!(!scheduler.queues().contains("a.stl"));
        assert_eq!(scheduler.queues().upload[0].filename, "b.stl");
        assert_eq!(scheduler.queues().upload[0].status, Status::PendingUpload);
        let added = scheduler
            .queues()
            .create
            .iter()
            .find(|item| item.filename == "c.stl")
            .expect("c.stl should have been enqueued");
        assert_eq!(added.status, Status::New);
    }

    #[tokio::test]
    async fn outcome_for_replaced_item_with_same_name_is_dropped() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        scheduler
            .queues
            .upload
            .push(item_with("cube.stl", Status::Uploading, 0));

        // The file is pulled out mid-upload and a fresh one with the same
        // name is dropped in before the dead upload's completion lands.
        scheduler.handle(Event::FileRemoved {
            filename: "cube.stl".into(),
        });
        scheduler.handle(Event::FileAdded {
            filename: "cube.stl".into(),
            path: PathBuf::from("/drop/cube.stl"),
        });
        scheduler.handle(Event::ActionDone(ActionOutcome {
            filename: "cube.stl".into(),
            action: Action::Upload,
            result: Ok(Default::default()),
        }));

        // The new incarnation starts from the beginning, untouched by the
        // dead one's outcome.
        assert_eq!(scheduler.queues().create[0].status, Status::New);
        assert_eq!(scheduler.queues().create[0].failures, 0);
    }

    #[tokio::test]
    async fn outcome_for_vanished_item_is_dropped() {
        let (mut scheduler, _rx, _) = build(Arc::new(MockRemote::default()), settings(3));
        scheduler.handle(Event::ActionDone(ActionOutcome {
            filename: "ghost.stl".into(),
            action: Action::Create,
            result: Ok(Default::default()),
        }));
        assert!(scheduler.queues().is_empty());
    }

    #[tokio::test]
    async fn unreachable_error_closes_gate_and_notifies_once() {
        let (mut scheduler, _rx, notifier) = build(Arc::new(MockRemote::default()), settings(3));
        open_gate(&mut scheduler);
        scheduler
            .queues
            .upload
            .push(item_with("cube.stl", Status::Uploading, 0));

        scheduler.handle(Event::ActionDone(ActionOutcome {
            filename: "cube.stl".into(),
            action: Action::Upload,
            result: Err(RemoteError::Unreachable("connection reset".into())),
        }));

        assert!(!scheduler.conn.gate_open());
        assert_eq!(notifier.unreachable_count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.queues().upload[0].status, Status::FailedUpload);
        assert_eq!(scheduler.queues().upload[0].failures, 1);
    }

    #[tokio::test]
    async fn unreachable_at_startup_notifies_without_prior_connection() {
        let (mut scheduler, _rx, notifier) = build(Arc::new(MockRemote::default()), settings(3));

        // The very first probe fails: the service was already down when the
        // process started, and the operator still hears about it, once.
        scheduler.handle(Event::CheckDone(Err(RemoteError::Unreachable(
            "no route to host".into(),
        ))));
        assert_eq!(notifier.unreachable_count.load(Ordering::SeqCst), 1);

        // The backoff retry fails again: the outage is already announced.
        scheduler.handle(Event::RetryCheck);
        scheduler.handle(Event::CheckDone(Err(RemoteError::Unreachable(
            "no route to host".into(),
        ))));
        assert_eq!(notifier.unreachable_count.load(Ordering::SeqCst), 1);

        // Reconnecting re-arms the notification for the next outage.
        scheduler.handle(Event::RetryCheck);
        open_gate(&mut scheduler);
        scheduler.handle(Event::CheckDone(Err(RemoteError::Unreachable(
            "connection reset".into(),
        ))));
        assert_eq!(notifier.unreachable_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unauthorized_error_discards_credential() {
        let remote = Arc::new(MockRemote::default());
        let (mut scheduler, _rx, _) = build(remote.clone(), settings(3));
        open_gate(&mut scheduler);

        scheduler.handle(Event::CheckDone(Err(RemoteError::Unauthorized {
            status: 401,
        })));

        assert!(!scheduler.conn.authorized);
        assert!(remote.invalidated.load(Ordering::SeqCst));
    }
}
