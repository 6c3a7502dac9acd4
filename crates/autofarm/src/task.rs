/*
[INPUT]:  TaskSettings snapshots from Start / RestartTask, TaskFinished reports
[OUTPUT]: At most one live worker thread with cooperative cancellation
[POS]:    Execution layer - worker lifecycle (start, stop, staged restart, retire)
[UPDATE]: When changing the single-worker guarantee or completion reporting
[UPDATE]: Stop clears a staged restart
*/

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Command, Notice, TaskOutcome, WorkerId};
use crate::error::WorkerError;
use crate::queue::CommandSender;
use crate::settings::TaskSettings;

/// Called once on the worker thread when the executor returns. Only enqueues.
pub type Completion = Box<dyn FnOnce(TaskOutcome) + Send + 'static>;

/// Everything one worker run sees. Built once per accepted start.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub worker: WorkerId,
    pub settings: Arc<TaskSettings>,
    pub cancel: CancellationToken,
    commands: CommandSender,
}

impl TaskConfig {
    pub fn new(
        worker: WorkerId,
        settings: Arc<TaskSettings>,
        cancel: CancellationToken,
        commands: CommandSender,
    ) -> Self {
        Self {
            worker,
            settings,
            cancel,
            commands,
        }
    }

    /// Safe point between steps; `true` means the run must wind down.
    pub fn checkpoint(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Asks the dispatcher to replace this run once it has returned.
    pub fn request_restart(&self, settings: Option<TaskSettings>) -> bool {
        self.commands.send(Command::RestartTask(settings))
    }

    pub fn notify(&self, notice: Notice) -> bool {
        self.commands.send(Command::Notify(notice))
    }
}

/// The long-running job a worker thread executes.
pub trait TaskExecutor: Send + Sync + 'static {
    /// Runs until done or until `config.checkpoint()` reports cancellation.
    fn run(&self, config: &TaskConfig) -> anyhow::Result<TaskOutcome>;
}

/// The single live worker
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The thread body has returned (its completion may still be queued).
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    fn join(self) {
        if self.thread.join().is_err() {
            // run_worker catches executor panics; this is a panic in the callback itself
            warn!(worker_id = %self.id, "worker thread panicked outside the executor");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running(WorkerId),
    Stopping(WorkerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// No worker was live; the replacement started immediately
    Spawned(WorkerId),
    /// Replacement waits for the live worker's completion
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    /// Completion from a worker that is no longer current
    Stale,
    Idle,
    /// A staged restart was spawned in place of the finished worker
    Replaced(WorkerId),
}

/// Owns the worker slot, the staged restart and the id counter.
pub struct WorkerLifecycle {
    executor: Arc<dyn TaskExecutor>,
    commands: CommandSender,
    next_id: u64,
    live: Option<WorkerHandle>,
    pending: Option<TaskSettings>,
    last_settings: Option<Arc<TaskSettings>>,
}

impl WorkerLifecycle {
    pub fn new(executor: Arc<dyn TaskExecutor>, commands: CommandSender) -> Self {
        Self {
            executor,
            commands,
            next_id: 0,
            live: None,
            pending: None,
            last_settings: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        match &self.live {
            None => WorkerState::Idle,
            Some(handle) if handle.is_stopping() => WorkerState::Stopping(handle.id),
            Some(handle) => WorkerState::Running(handle.id),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn live_id(&self) -> Option<WorkerId> {
        self.live.as_ref().map(WorkerHandle::id)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Settings of the most recently spawned run
    pub fn last_settings(&self) -> Option<&Arc<TaskSettings>> {
        self.last_settings.as_ref()
    }

    /// Spawns a worker unless one is live.
    ///
    /// A staged restart counts as live: its replacement spawns from the pending
    /// `TaskFinished`, so the start is rejected rather than run alongside it.
    pub fn start(&mut self, settings: TaskSettings) -> Result<WorkerId, WorkerError> {
        if let Some(handle) = &self.live {
            if !handle.is_finished() || self.pending.is_some() {
                return Err(WorkerError::AlreadyActive(handle.id));
            }
            // Finished but its TaskFinished is still queued; that report will be stale.
            if let Some(finished) = self.live.take() {
                debug!(worker_id = %finished.id, "retiring finished worker ahead of its report");
                finished.join();
            }
        }
        self.spawn(Arc::new(settings))
    }

    /// Sets the live worker's token and drops any staged restart.
    ///
    /// Returns the worker that was asked to stop, or `None` when nothing changed.
    pub fn request_stop(&mut self) -> Option<WorkerId> {
        if self.pending.take().is_some() {
            info!("staged restart discarded by stop request");
        }
        let handle = self.live.as_ref()?;
        if handle.is_stopping() {
            return None;
        }
        handle.cancel.cancel();
        info!(worker_id = %handle.id, "stop requested");
        Some(handle.id)
    }

    /// Replaces the worker without blocking.
    ///
    /// With a live worker the new settings are staged (replacing any older staged
    /// settings) and the live worker is asked to stop.
    pub fn restart(&mut self, settings: TaskSettings) -> Result<RestartOutcome, WorkerError> {
        match &self.live {
            Some(handle) => {
                handle.cancel.cancel();
                if self.pending.replace(settings).is_some() {
                    debug!("newer restart replaced the staged one");
                }
                info!(worker_id = %handle.id, "restart staged until worker completes");
                Ok(RestartOutcome::Staged)
            }
            None => self.spawn(Arc::new(settings)).map(RestartOutcome::Spawned),
        }
    }

    /// Retires the worker named by a completion report and spawns a staged restart.
    pub fn complete(&mut self, worker: WorkerId) -> Result<Retirement, WorkerError> {
        match &self.live {
            Some(handle) if handle.id == worker => {}
            _ => {
                debug!(worker_id = %worker, "ignoring stale completion");
                return Ok(Retirement::Stale);
            }
        }
        if let Some(handle) = self.live.take() {
            handle.join();
        }
        match self.pending.take() {
            Some(settings) => self.spawn(Arc::new(settings)).map(Retirement::Replaced),
            None => Ok(Retirement::Idle),
        }
    }

    /// Gives up on the live worker without joining it.
    pub fn abandon(&mut self) -> Option<WorkerId> {
        self.pending = None;
        let handle = self.live.take()?;
        handle.cancel.cancel();
        warn!(worker_id = %handle.id, "worker abandoned before reaching a checkpoint");
        Some(handle.id)
    }

    fn spawn(&mut self, settings: Arc<TaskSettings>) -> Result<WorkerId, WorkerError> {
        let id = WorkerId(self.next_id + 1);
        let cancel = CancellationToken::new();
        let config = TaskConfig::new(id, Arc::clone(&settings), cancel.clone(), self.commands.clone());
        let executor = Arc::clone(&self.executor);
        let completion = completion_for(self.commands.clone(), id);

        let thread = thread::Builder::new()
            .name(format!("autofarm-{id}"))
            .spawn(move || run_worker(executor.as_ref(), config, completion))
            .map_err(|err| WorkerError::Spawn(err.to_string()))?;

        self.next_id = id.0;
        self.last_settings = Some(Arc::clone(&settings));
        self.live = Some(WorkerHandle {
            id,
            cancel,
            thread,
        });
        info!(worker_id = %id, "worker spawned");
        Ok(id)
    }
}

impl std::fmt::Debug for WorkerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLifecycle")
            .field("state", &self.state())
            .field("pending", &self.pending.is_some())
            .field("next_id", &self.next_id)
            .finish()
    }
}

fn completion_for(commands: CommandSender, worker: WorkerId) -> Completion {
    Box::new(move |outcome| {
        commands.send(Command::TaskFinished { worker, outcome });
    })
}

fn run_worker(executor: &dyn TaskExecutor, config: TaskConfig, completion: Completion) {
    let span = tracing::info_span!("worker", worker_id = %config.worker);
    let _enter = span.enter();
    info!(target_label = %config.settings.target_label(), "worker running");

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| executor.run(&config))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            error!(error = %format!("{err:#}"), "task executor failed");
            TaskOutcome::Failed(format!("{err:#}"))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "task executor panicked");
            TaskOutcome::Failed(format!("worker panicked: {message}"))
        }
    };

    info!(?outcome, "worker finished");
    completion(outcome);
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
