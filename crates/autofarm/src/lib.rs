/*
[INPUT]:  Public API exports for the autofarm crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod farm;
pub mod logging;
pub mod queue;
pub mod relaunch;
pub mod settings;
pub mod task;
pub mod update;

// Re-export main types for convenience
pub use command::{Command, Notice, Severity, TaskOutcome, WorkerId};
pub use config::AppConfig;
pub use dispatcher::{Dispatcher, DispatcherConfig, ExitPolicy, ExitReason, UiState};
pub use error::{ConfigError, WorkerError};
pub use farm::FarmExecutor;
pub use queue::{CommandQueue, CommandSender, command_queue};
pub use settings::{ConfigStore, TaskSettings};
pub use task::{TaskConfig, TaskExecutor, WorkerLifecycle, WorkerState};
pub use update::{CheckOrigin, CheckSchedule, UpdateCoordinator, UpdateState};
