//! Terminal output — colored reports for the status and check subcommands.
//!
//! Uses the `console` crate for styling. The long-running `run` subcommand
//! logs through `tracing` instead; this module only renders one-shot views.

use console::Style;

use crate::pipeline::{Queues, Status, WorkItem};
use crate::remote::UserInfo;

/// Styled renderer for one-shot reports.
pub struct Report {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
    bold: Style,
}

impl Report {
    pub fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            bold: Style::new().bold(),
        }
    }

    /// Print the queue snapshot, one section per stage.
    pub fn print_queues(&self, queues: &Queues) {
        if queues.is_empty() {
            println!("{}", self.dim.apply_to("queues are empty"));
            return;
        }
        self.print_stage("create", &queues.create);
        self.print_stage("upload", &queues.upload);
        self.print_stage("publish", &queues.publish);
        println!();
        println!("{} item(s) queued", self.bold.apply_to(queues.len()));
    }

    fn print_stage(&self, label: &str, items: &[WorkItem]) {
        if items.is_empty() {
            return;
        }
        println!();
        println!("{}", self.bold.apply_to(format!("─── {label} ───")));
        for item in items {
            let (glyph, style) = self.status_glyph(item.status);
            let failures = if item.failures > 0 {
                format!("  ({} failure(s))", item.failures)
            } else {
                String::new()
            };
            println!(
                "  {} {}  {}{}",
                style.apply_to(glyph),
                item.filename,
                self.dim.apply_to(item.status.to_string()),
                self.yellow.apply_to(failures),
            );
        }
    }

    fn status_glyph(&self, status: Status) -> (&'static str, &Style) {
        match status {
            Status::Collected | Status::Tidied => ("✓", &self.green),
            Status::FailedCreation
            | Status::FailedRequest
            | Status::FailedUpload
            | Status::FailedFinalize
            | Status::FailedPublish
            | Status::FailedCollect => ("✗", &self.red),
            _ if status.is_in_flight() => ("…", &self.yellow),
            _ => ("·", &self.dim),
        }
    }

    /// Print the outcome of an API probe.
    pub fn print_check(&self, result: &Result<UserInfo, crate::remote::RemoteError>) {
        match result {
            Ok(user) => {
                println!(
                    "  {} authenticated as {}",
                    self.green.apply_to("✓"),
                    self.bold.apply_to(&user.name)
                );
            }
            Err(err) => {
                println!("  {} {err}", self.red.apply_to("✗"));
            }
        }
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}
