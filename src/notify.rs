//! User-facing notifications, specified only at the boundary.
//!
//! Delivery (desktop popups, webhooks, whatever the host wants) is outside
//! the pipeline; the default implementation just logs. Tests substitute a
//! recording implementation.

use std::sync::Arc;

use tracing::{info, warn};

pub trait Notifier {
    /// A record was created for a dropped file.
    fn item_created(&self, name: &str, id: u64);

    /// The publishing service stopped answering.
    fn unreachable(&self);
}

/// Notifier that reports through the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn item_created(&self, name: &str, id: u64) {
        info!("new record created: name \"{name}\", id {id}");
    }

    fn unreachable(&self) {
        warn!("publishing service unreachable (check wifi?)");
    }
}

impl<T: Notifier> Notifier for Arc<T> {
    fn item_created(&self, name: &str, id: u64) {
        (**self).item_created(name, id);
    }

    fn unreachable(&self) {
        (**self).unreachable();
    }
}
