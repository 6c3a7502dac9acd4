/*
[INPUT]:  UI actions, worker completions, update coordinator reports
[OUTPUT]: The Command vocabulary consumed by the dispatcher
[POS]:    Message layer - every cross-thread interaction is one of these
[UPDATE]: When adding a new kind of instruction or background report
*/

use std::fmt;
use std::path::PathBuf;

use autofarm_updater::ReleaseInfo;
use chrono::{DateTime, Local};

use crate::settings::TaskSettings;

/// Identifies one worker run. Ids increase monotonically per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// How a worker run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ran out of work (target finished, run budget used, or handed off to a restart)
    Completed { runs: u64 },
    /// Observed the cancellation token at a checkpoint
    Cancelled,
    /// Executor returned an error or panicked
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub body: String,
    /// Modal notices block the UI until dismissed
    pub modal: bool,
    pub at: DateTime<Local>,
}

impl Notice {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, body, false)
    }

    pub fn modal_info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, body, true)
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, body, true)
    }

    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, body, false)
    }

    fn new(severity: Severity, title: impl Into<String>, body: impl Into<String>, modal: bool) -> Self {
        Self {
            severity,
            title: title.into(),
            body: body.into(),
            modal,
            at: Local::now(),
        }
    }
}

/// All messages the dispatcher understands
#[derive(Debug, Clone)]
pub enum Command {
    /// Start a worker with this settings snapshot
    Start(TaskSettings),
    /// Request cooperative cancellation of the live worker
    Stop,
    /// Replace the worker. `None` derives the fallback-target settings from the last start.
    RestartTask(Option<TaskSettings>),
    /// Terminal report from a worker's completion callback
    TaskFinished { worker: WorkerId, outcome: TaskOutcome },
    /// User asked for an update check now
    CheckForUpdates,
    UpdateAvailable(ReleaseInfo),
    NoUpdateFound,
    /// User accepted the available update
    DownloadUpdate,
    DownloadStarted(u64),
    Progress(u64),
    DownloadComplete,
    RestartReady(PathBuf),
    /// Terminal failure of an update check or download session
    UpdateFailed(String),
    /// Any other failure; shown to the user, never touches the update phase
    Error(String),
    Notify(Notice),
    /// UI closed or the process was signalled
    Shutdown,
}

impl Command {
    /// Short name used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Stop => "stop",
            Command::RestartTask(_) => "restart_task",
            Command::TaskFinished { .. } => "task_finished",
            Command::CheckForUpdates => "check_for_updates",
            Command::UpdateAvailable(_) => "update_available",
            Command::NoUpdateFound => "no_update_found",
            Command::DownloadUpdate => "download_update",
            Command::DownloadStarted(_) => "download_started",
            Command::Progress(_) => "progress",
            Command::DownloadComplete => "download_complete",
            Command::RestartReady(_) => "restart_ready",
            Command::UpdateFailed(_) => "update_failed",
            Command::Error(_) => "error",
            Command::Notify(_) => "notify",
            Command::Shutdown => "shutdown",
        }
    }
}
