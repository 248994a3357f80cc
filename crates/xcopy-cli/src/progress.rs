//! Live progress for a running task

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use xcopy_engine::{StateName, TaskEvent};
use xcopy_types::EntityKind;

/// Counts terminal nodes from task events and shows them on a spinner
pub struct TaskProgress {
    progress_bar: Option<ProgressBar>,
    dirs: u64,
    files: u64,
    failed: u64,
    conflicts: u64,
}

impl TaskProgress {
    /// Create a tracker; `quiet` hides the spinner but still counts
    pub fn new(quiet: bool) -> Self {
        let progress_bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new_spinner();
            if let Ok(progress_style) =
                ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}")
            {
                pb.set_style(progress_style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        };

        let progress = Self {
            progress_bar,
            dirs: 0,
            files: 0,
            failed: 0,
            conflicts: 0,
        };
        progress.refresh();
        progress
    }

    /// Account for one event
    pub fn observe(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::StateEntered {
                root: false,
                kind,
                state,
                ..
            } => match (state, kind) {
                (StateName::Finish, EntityKind::Directory) => self.dirs += 1,
                (StateName::Finish, EntityKind::File) => self.files += 1,
                (StateName::Failed, _) => self.failed += 1,
                (StateName::Conflict, _) => self.conflicts += 1,
                _ => return,
            },
            TaskEvent::EntryDropped { .. } => self.failed += 1,
            _ => return,
        }
        self.refresh();
    }

    /// Terminal nodes seen so far: directories, files, failures
    pub fn counts(&self) -> (u64, u64, u64) {
        (self.dirs, self.files, self.failed)
    }

    fn refresh(&self) {
        if let Some(pb) = &self.progress_bar {
            let mut message = format!("{} dirs, {} files", self.dirs, self.files);
            if self.failed > 0 {
                message.push_str(&format!(", {}", style(format!("{} failed", self.failed)).red()));
            }
            if self.conflicts > 0 {
                message.push_str(&format!(
                    ", {}",
                    style(format!("{} conflicts", self.conflicts)).yellow()
                ));
            }
            pb.set_message(message);
        }
    }

    /// Run `f` with the spinner hidden, for prompts and messages
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        match &self.progress_bar {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }

    /// Finish and clear the progress bar
    pub fn finish_and_clear(&self) {
        if let Some(pb) = &self.progress_bar {
            pb.finish_and_clear();
        }
    }
}
