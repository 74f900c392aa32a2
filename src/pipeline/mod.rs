pub mod actions;
pub mod item;
pub mod persistence;
pub mod scheduler;

pub use actions::{Action, ActionExecutor, ActionOutcome};
pub use item::{Queues, Stage, Status, WorkItem};
pub use persistence::SnapshotStore;
pub use scheduler::{DEFAULT_TICK_INTERVAL, Event, PipelineSettings, Scheduler};
