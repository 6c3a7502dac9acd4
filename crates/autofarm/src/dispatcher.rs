/*
[INPUT]:  CommandQueue, WorkerLifecycle, UpdateCoordinator, ConfigStore, Relauncher
[OUTPUT]: UI-visible state mutated one command at a time; process exit decision
[POS]:    Core loop - the single consumer of every Command
[UPDATE]: When adding a Command variant or changing exit/drain behaviour
[UPDATE]: Shutdown drains the worker for a bounded time before exiting
[UPDATE]: Updater failures arrive as UpdateFailed; RestartReady drains, main launches
*/

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use autofarm_updater::ReleaseInfo;
use tracing::{debug, error, info, warn};

use crate::command::{Command, Notice, TaskOutcome, WorkerId};
use crate::config::DispatcherSettings;
use crate::error::WorkerError;
use crate::queue::{CommandQueue, CommandSender, command_queue};
use crate::relaunch::{ProcessRelauncher, Relauncher};
use crate::settings::{ConfigStore, TaskSettings};
use crate::task::{RestartOutcome, Retirement, TaskExecutor, WorkerLifecycle, WorkerState, panic_message};
use crate::update::{
    CheckOrigin, CheckSchedule, UpdateCoordinator, UpdateEvent, UpdateState, UpdateStateMachine,
};

/// When the dispatch loop ends on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Interactive front end: only `Shutdown` or a relaunch ends the loop
    UntilShutdown,
    /// Headless: the loop ends once the started task is done
    WhenTaskIdle,
}

/// Why the dispatch loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    TaskIdle(TaskOutcome),
    StartRejected(String),
    Relaunched(PathBuf),
}

impl ExitReason {
    pub fn is_success(&self) -> bool {
        match self {
            ExitReason::Shutdown | ExitReason::Relaunched(_) => true,
            ExitReason::TaskIdle(outcome) => !matches!(outcome, TaskOutcome::Failed(_)),
            ExitReason::StartRejected(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub shutdown_drain: Duration,
    pub notice_history: usize,
    pub exit_policy: ExitPolicy,
}

impl DispatcherConfig {
    pub fn from_settings(settings: &DispatcherSettings, exit_policy: ExitPolicy) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            shutdown_drain: Duration::from_secs(settings.shutdown_drain_secs),
            notice_history: settings.notice_history.max(1),
            exit_policy,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_settings(&DispatcherSettings::default(), ExitPolicy::UntilShutdown)
    }
}

/// Everything a front end renders. Only the dispatcher mutates it.
#[derive(Debug, Clone)]
pub struct UiState {
    pub task_active: bool,
    /// False while waiting for a worker to wind down
    pub controls_enabled: bool,
    pub task_label: Option<String>,
    /// The running task is the fallback target
    pub fallback_mode: bool,
    pub status: String,
    pub worker: WorkerState,
    pub update: UpdateState,
    /// Notice blocking the UI until dismissed
    pub modal: Option<Notice>,
    pending_modals: VecDeque<Notice>,
    /// Newest last
    pub notices: VecDeque<Notice>,
    notice_history: usize,
    /// Last settings read from the config store
    pub settings: Option<TaskSettings>,
}

impl UiState {
    fn new(notice_history: usize) -> Self {
        Self {
            task_active: false,
            controls_enabled: true,
            task_label: None,
            fallback_mode: false,
            status: "Idle".to_string(),
            worker: WorkerState::Idle,
            update: UpdateState::Idle,
            modal: None,
            pending_modals: VecDeque::new(),
            notices: VecDeque::new(),
            notice_history,
            settings: None,
        }
    }

    /// `(current, total)` while downloading
    pub fn download_progress(&self) -> Option<(u64, u64)> {
        match &self.update {
            UpdateState::Downloading { current, total, .. } => Some((*current, *total)),
            _ => None,
        }
    }

    fn push_notice(&mut self, notice: Notice) {
        if notice.modal {
            if self.modal.is_none() {
                self.modal = Some(notice.clone());
            } else {
                self.pending_modals.push_back(notice.clone());
            }
        }
        self.notices.push_back(notice);
        while self.notices.len() > self.notice_history {
            self.notices.pop_front();
        }
    }

    fn dismiss_modal(&mut self) {
        self.modal = self.pending_modals.pop_front();
    }

    fn show_running(&mut self, settings: &TaskSettings) {
        self.task_active = true;
        self.controls_enabled = true;
        self.task_label = Some(settings.target_label().to_string());
        self.fallback_mode = settings.is_fallback_target();
        self.status = format!("Running {}", settings.target_label());
    }

    fn show_idle(&mut self, status: impl Into<String>) {
        self.task_active = false;
        self.controls_enabled = true;
        self.fallback_mode = false;
        self.status = status.into();
    }
}

struct Drain {
    deadline: Instant,
    reason: ExitReason,
}

/// Single-consumer command loop.
pub struct Dispatcher {
    queue: CommandQueue,
    sender: CommandSender,
    workers: WorkerLifecycle,
    updates: Option<UpdateCoordinator>,
    schedule: CheckSchedule,
    update_phase: UpdateStateMachine,
    user_check_pending: bool,
    /// Version last announced to the user; later checks finding it stay quiet
    announced_version: Option<String>,
    store: ConfigStore,
    relauncher: Box<dyn Relauncher>,
    config: DispatcherConfig,
    ui: UiState,
    drain: Option<Drain>,
    exit: Option<ExitReason>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, executor: Arc<dyn TaskExecutor>, store: ConfigStore) -> Self {
        let (sender, queue) = command_queue();
        let workers = WorkerLifecycle::new(executor, sender.clone());
        let mut dispatcher = Self {
            queue,
            sender,
            workers,
            updates: None,
            schedule: CheckSchedule::disabled(),
            update_phase: UpdateStateMachine::new(),
            user_check_pending: false,
            announced_version: None,
            store,
            relauncher: Box::new(ProcessRelauncher::from_env()),
            ui: UiState::new(config.notice_history),
            config,
            drain: None,
            exit: None,
        };
        dispatcher.refresh_settings();
        dispatcher
    }

    /// Enables update checks; `schedule` drives the periodic ones.
    pub fn set_updates(&mut self, coordinator: UpdateCoordinator, schedule: CheckSchedule) {
        self.updates = Some(coordinator);
        self.schedule = schedule;
    }

    pub fn set_relauncher(&mut self, relauncher: Box<dyn Relauncher>) {
        self.relauncher = relauncher;
    }

    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn workers(&self) -> &WorkerLifecycle {
        &self.workers
    }

    pub fn update_state(&self) -> &UpdateState {
        self.update_phase.state()
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Commands waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.exit.as_ref()
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_some()
    }

    /// Front ends call this from the consumer thread when the user closes a modal.
    pub fn dismiss_modal(&mut self) {
        if matches!(self.update_phase.state(), UpdateState::Error { .. }) {
            self.apply_update(UpdateEvent::Dismiss);
        }
        self.ui.dismiss_modal();
    }

    /// Stores the running version and announces it when it changed since the last launch.
    pub fn record_running_version(&mut self, version: &str) {
        let mut settings = match self.store.load() {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "cannot record running version");
                return;
            }
        };
        if settings.last_version == version {
            return;
        }
        let previous = std::mem::replace(&mut settings.last_version, version.to_string());
        if let Err(err) = self.store.save(&settings) {
            warn!(error = %err, "cannot record running version");
            return;
        }
        if !previous.is_empty() {
            info!(%previous, %version, "running an updated build");
            self.ui.push_notice(Notice::modal_info(
                "Updated",
                format!("autofarm was updated from {previous} to {version}."),
            ));
        }
        self.ui.settings = Some(settings);
    }

    /// Runs housekeeping, then dispatches at most one command.
    ///
    /// Returns `true` when a command was handled.
    pub fn tick(&mut self) -> bool {
        self.housekeeping(Instant::now());
        if self.exit.is_some() {
            return false;
        }
        let Some(command) = self.queue.try_next() else {
            return false;
        };

        let kind = command.kind();
        let update_session = matches!(command, Command::RestartReady(_));
        let is_report = matches!(command, Command::Error(_) | Command::UpdateFailed(_));
        debug!(command = kind, "dispatching");
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.handle(command)));
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(payload) => Some(format!(
                "{kind} handler panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        if let Some(message) = failure {
            error!(command = kind, error = %message, "command handler failed");
            if update_session {
                self.sender.send(Command::UpdateFailed(message));
            } else if !is_report {
                self.sender.send(Command::Error(message));
            }
        }
        true
    }

    /// Ticks every poll interval until the loop decides to exit.
    pub async fn run(&mut self) -> ExitReason {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            while self.tick() {
                tokio::task::yield_now().await;
            }
            if let Some(reason) = self.exit.take() {
                info!(?reason, "dispatcher exiting");
                return reason;
            }
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        if let Some(drain) = &self.drain {
            if !self.workers.is_live() {
                let reason = drain.reason.clone();
                self.finish(reason);
            } else if now >= drain.deadline {
                let reason = drain.reason.clone();
                if let Some(worker) = self.workers.abandon() {
                    warn!(worker_id = %worker, drain = ?self.config.shutdown_drain, "drain timed out");
                }
                self.finish(reason);
            }
            return;
        }

        if !self.schedule.poll(now) {
            return;
        }
        let Some(updates) = &self.updates else {
            return;
        };
        // An offered release or an unacknowledged error does not pause the schedule.
        let settled = matches!(
            self.update_phase.state(),
            UpdateState::Idle | UpdateState::Available { .. } | UpdateState::Error { .. }
        );
        if !settled {
            debug!(phase = self.update_phase.state().name(), "scheduled check skipped");
            return;
        }
        if updates.check_for_updates(CheckOrigin::Scheduled) {
            self.apply_update(UpdateEvent::CheckStarted);
        }
    }

    fn handle(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Start(settings) => self.on_start(settings),
            Command::Stop => {
                self.on_stop();
                Ok(())
            }
            Command::RestartTask(settings) => self.on_restart(settings),
            Command::TaskFinished { worker, outcome } => self.on_task_finished(worker, outcome),
            Command::CheckForUpdates => {
                self.on_check_for_updates();
                Ok(())
            }
            Command::UpdateAvailable(release) => {
                self.on_update_available(release);
                Ok(())
            }
            Command::NoUpdateFound => {
                self.apply_update(UpdateEvent::NotFound);
                if std::mem::take(&mut self.user_check_pending) {
                    self.emit(Notice::info("Up to date", "No newer version is available."));
                }
                Ok(())
            }
            Command::DownloadUpdate => {
                self.on_download_update();
                Ok(())
            }
            Command::DownloadStarted(total) => {
                self.apply_update(UpdateEvent::DownloadStarted(total));
                self.ui.status = "Downloading update".to_string();
                Ok(())
            }
            Command::Progress(count) => {
                self.apply_update(UpdateEvent::Progress(count));
                Ok(())
            }
            Command::DownloadComplete => {
                self.apply_update(UpdateEvent::Verified);
                self.ui.status = "Update downloaded".to_string();
                Ok(())
            }
            Command::RestartReady(path) => self.on_restart_ready(&path),
            Command::UpdateFailed(message) => {
                self.on_update_failed(message);
                Ok(())
            }
            Command::Error(message) => {
                self.on_error(message);
                Ok(())
            }
            Command::Notify(notice) => {
                self.ui.push_notice(notice);
                Ok(())
            }
            Command::Shutdown => {
                self.begin_drain(ExitReason::Shutdown);
                Ok(())
            }
        }
    }

    fn on_start(&mut self, settings: TaskSettings) -> anyhow::Result<()> {
        if self.drain.is_some() {
            warn!("start ignored while shutting down");
            return Ok(());
        }
        if let Err(err) = settings.validate() {
            if self.config.exit_policy == ExitPolicy::WhenTaskIdle {
                self.finish(ExitReason::StartRejected(err.to_string()));
            }
            return Err(err).context("task settings rejected");
        }

        match self.workers.start(settings) {
            Ok(worker) => {
                if let Some(settings) = self.workers.last_settings().cloned() {
                    info!(worker_id = %worker, target_label = %settings.target_label(), "task started");
                    self.ui.show_running(&settings);
                }
                self.ui.worker = self.workers.state();
                Ok(())
            }
            Err(WorkerError::AlreadyActive(worker)) => {
                warn!(worker_id = %worker, "start dropped; a worker is already live");
                Ok(())
            }
            Err(err) => Err(err).context("start task"),
        }
    }

    fn on_stop(&mut self) {
        match self.workers.request_stop() {
            Some(worker) => {
                debug!(worker_id = %worker, "waiting for worker checkpoint");
                self.ui.controls_enabled = false;
                self.ui.status = "Stopping".to_string();
            }
            None => debug!("stop ignored; nothing to stop"),
        }
        self.ui.worker = self.workers.state();
    }

    fn on_restart(&mut self, settings: Option<TaskSettings>) -> anyhow::Result<()> {
        if self.drain.is_some() {
            warn!("restart ignored while shutting down");
            return Ok(());
        }
        let settings = match settings {
            Some(settings) => {
                settings.validate().context("restart settings rejected")?;
                settings
            }
            None => self
                .workers
                .last_settings()
                .map(|settings| settings.for_fallback_target())
                .context("no previous task to restart")?,
        };
        let fallback = settings.is_fallback_target();

        match self.workers.restart(settings).context("restart task")? {
            RestartOutcome::Spawned(worker) => {
                info!(worker_id = %worker, "restart spawned immediately");
                if let Some(settings) = self.workers.last_settings().cloned() {
                    self.ui.show_running(&settings);
                }
            }
            RestartOutcome::Staged => {
                self.ui.controls_enabled = false;
                self.ui.status = "Restarting".to_string();
            }
        }
        if fallback {
            self.emit(Notice::info(
                "Switching target",
                "Out of revival resources; continuing on the fallback target.",
            ));
        }
        self.ui.worker = self.workers.state();
        Ok(())
    }

    fn on_task_finished(&mut self, worker: WorkerId, outcome: TaskOutcome) -> anyhow::Result<()> {
        let retirement = self.workers.complete(worker).context("replace finished worker")?;
        self.ui.worker = self.workers.state();

        match retirement {
            Retirement::Stale => return Ok(()),
            Retirement::Replaced(next) => {
                info!(previous = %worker, worker_id = %next, "staged restart running");
                self.refresh_settings();
                if let Some(settings) = self.workers.last_settings().cloned() {
                    self.ui.show_running(&settings);
                }
                self.emit(Notice::info("Task restarted", format!("{next} replaced {worker}.")));
            }
            Retirement::Idle => {
                self.refresh_settings();
                let notice = match &outcome {
                    TaskOutcome::Completed { runs } => {
                        self.ui.show_idle("Finished");
                        Notice::modal_info("Task finished", format!("Completed {runs} runs."))
                    }
                    TaskOutcome::Cancelled => {
                        self.ui.show_idle("Stopped");
                        Notice::info("Task stopped", format!("{worker} stopped."))
                    }
                    TaskOutcome::Failed(message) => {
                        self.ui.show_idle("Failed");
                        Notice::error("Task failed", message.clone())
                    }
                };
                self.emit(notice);

                if self.drain.is_none() && self.config.exit_policy == ExitPolicy::WhenTaskIdle {
                    self.finish(ExitReason::TaskIdle(outcome));
                }
            }
        }
        Ok(())
    }

    fn on_check_for_updates(&mut self) {
        let Some(updates) = &self.updates else {
            self.emit(Notice::info("Updates disabled", "Update checks are turned off."));
            return;
        };
        if !self.update_phase.can_transition(&UpdateEvent::CheckStarted) {
            debug!(phase = self.update_phase.state().name(), "check ignored in this phase");
            return;
        }
        if updates.check_for_updates(CheckOrigin::User) {
            self.apply_update(UpdateEvent::CheckStarted);
            self.user_check_pending = true;
        }
    }

    fn on_update_available(&mut self, release: ReleaseInfo) {
        let asked = std::mem::take(&mut self.user_check_pending);
        let version = release.version.clone();
        if !self.apply_update(UpdateEvent::Found(release)) {
            return;
        }
        if asked || self.announced_version.as_deref() != Some(version.as_str()) {
            self.announced_version = Some(version.clone());
            self.emit(Notice::modal_info(
                "Update available",
                format!("Version {version} is available. Press d to download it."),
            ));
        }
    }

    fn on_download_update(&mut self) {
        let Some(release) = self.update_phase.state().available_release().cloned() else {
            self.emit(Notice::info("No update", "There is no update to download."));
            return;
        };
        let Some(updates) = &self.updates else {
            debug!("download ignored; updates disabled");
            return;
        };
        if updates.download(release) {
            self.ui.status = "Preparing download".to_string();
        } else {
            debug!("download dropped; update session in flight");
        }
    }

    fn on_restart_ready(&mut self, path: &Path) -> anyhow::Result<()> {
        if !self.update_phase.can_transition(&UpdateEvent::RestartAccepted) {
            warn!(
                phase = self.update_phase.state().name(),
                path = %path.display(),
                "restart ignored before the download completed"
            );
            return Ok(());
        }
        self.relauncher
            .prepare(path)
            .context("prepare updated build")?;
        self.apply_update(UpdateEvent::RestartAccepted);
        self.ui.status = "Restarting into the new version".to_string();
        self.begin_drain(ExitReason::Relaunched(path.to_path_buf()));
        Ok(())
    }

    fn on_update_failed(&mut self, message: String) {
        self.user_check_pending = false;
        self.apply_update(UpdateEvent::Failed(message.clone()));
        self.ui.push_notice(Notice::error("Update failed", message));
    }

    fn on_error(&mut self, message: String) {
        self.ui.push_notice(Notice::error("Error", message));
    }

    /// Requests stop and keeps ticking until the worker retires or the drain times out.
    fn begin_drain(&mut self, reason: ExitReason) {
        if self.drain.is_some() || self.exit.is_some() {
            return;
        }
        self.workers.request_stop();
        self.ui.worker = self.workers.state();
        self.ui.controls_enabled = false;
        if self.workers.is_live() {
            info!(?reason, drain = ?self.config.shutdown_drain, "draining worker before exit");
            self.ui.status = "Shutting down".to_string();
            self.drain = Some(Drain {
                deadline: Instant::now() + self.config.shutdown_drain,
                reason,
            });
        } else {
            self.finish(reason);
        }
    }

    fn finish(&mut self, reason: ExitReason) {
        self.drain = None;
        if self.exit.is_none() {
            self.exit = Some(reason);
        }
    }

    /// Applies an update event; invalid transitions are logged and ignored.
    fn apply_update(&mut self, event: UpdateEvent) -> bool {
        match self.update_phase.transition(event) {
            Ok(()) => {
                self.ui.update = self.update_phase.state().clone();
                true
            }
            Err(err) => {
                warn!(error = %err, "update event ignored");
                false
            }
        }
    }

    fn emit(&self, notice: Notice) {
        self.sender.send(Command::Notify(notice));
    }

    fn refresh_settings(&mut self) {
        match self.store.load() {
            Ok(settings) => self.ui.settings = Some(settings),
            Err(err) => warn!(error = %err, path = %self.store.path().display(), "settings refresh failed"),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .field("update", &self.update_phase.state().name())
            .field("queued", &self.queue.len())
            .field("exit", &self.exit)
            .finish()
    }
}

/// Starts the task from the store without a UI; used by the headless front end.
pub fn enqueue_stored_start(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    let settings = dispatcher.store().load().context("load task settings")?;
    if !dispatcher.sender().send(Command::Start(settings)) {
        bail!("dispatcher is gone");
    }
    Ok(())
}
