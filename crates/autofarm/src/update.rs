/*
[INPUT]:  UpdateTransport, CommandSender, tokio runtime handle
[OUTPUT]: Background check/download sessions reported as Commands; update phase state machine
[POS]:    Update layer - single in-flight check or download, periodic schedule
[UPDATE]: When changing update phases, progress throttling or verification order
[UPDATE]: Verify the artifact before announcing DownloadComplete
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use autofarm_updater::{ProgressSink, ReleaseInfo, UpdateTransport, verify_artifact};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::command::Command;
use crate::queue::CommandSender;

/// Progress granularity when the artifact size is unknown
const UNKNOWN_TOTAL_STEP: u64 = 64 * 1024;

/// Update phase as shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdateState {
    #[default]
    Idle,
    Checking,
    Available {
        release: ReleaseInfo,
    },
    Downloading {
        release: ReleaseInfo,
        current: u64,
        total: u64,
    },
    /// Artifact written and verified
    Complete {
        release: ReleaseInfo,
    },
    /// Replacement process is being launched
    Restarting,
    Error {
        message: String,
    },
}

impl UpdateState {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Available { .. } => "available",
            UpdateState::Downloading { .. } => "downloading",
            UpdateState::Complete { .. } => "complete",
            UpdateState::Restarting => "restarting",
            UpdateState::Error { .. } => "error",
        }
    }

    /// Release offered for download, if any
    pub fn available_release(&self) -> Option<&ReleaseInfo> {
        match self {
            UpdateState::Available { release } => Some(release),
            _ => None,
        }
    }
}

/// Inputs to the update phase machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    CheckStarted,
    Found(ReleaseInfo),
    NotFound,
    DownloadStarted(u64),
    Progress(u64),
    Verified,
    RestartAccepted,
    Failed(String),
    /// User acknowledged an error
    Dismiss,
}

impl UpdateEvent {
    fn name(&self) -> &'static str {
        match self {
            UpdateEvent::CheckStarted => "check_started",
            UpdateEvent::Found(_) => "found",
            UpdateEvent::NotFound => "not_found",
            UpdateEvent::DownloadStarted(_) => "download_started",
            UpdateEvent::Progress(_) => "progress",
            UpdateEvent::Verified => "verified",
            UpdateEvent::RestartAccepted => "restart_accepted",
            UpdateEvent::Failed(_) => "failed",
            UpdateEvent::Dismiss => "dismiss",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateStateError {
    #[error("invalid update transition: {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },
}

/// Validates update phase changes
#[derive(Debug, Default)]
pub struct UpdateStateMachine {
    state: UpdateState,
}

impl UpdateStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn can_transition(&self, event: &UpdateEvent) -> bool {
        use UpdateEvent as E;
        use UpdateState as S;
        matches!(
            (&self.state, event),
            (S::Idle | S::Available { .. } | S::Error { .. }, E::CheckStarted)
                | (S::Idle | S::Checking, E::Found(_) | E::NotFound)
                | (S::Available { .. }, E::DownloadStarted(_))
                | (S::Downloading { .. }, E::Progress(_) | E::Verified)
                | (S::Complete { .. }, E::RestartAccepted)
                | (
                    S::Checking | S::Available { .. } | S::Downloading { .. } | S::Complete { .. },
                    E::Failed(_)
                )
                | (S::Error { .. }, E::Dismiss)
        )
    }

    pub fn transition(&mut self, event: UpdateEvent) -> Result<(), UpdateStateError> {
        if !self.can_transition(&event) {
            return Err(UpdateStateError::InvalidTransition {
                from: self.state.name(),
                event: event.name(),
            });
        }

        let previous = std::mem::take(&mut self.state);
        self.state = match (previous, event) {
            (_, UpdateEvent::CheckStarted) => UpdateState::Checking,
            (_, UpdateEvent::Found(release)) => UpdateState::Available { release },
            (_, UpdateEvent::NotFound | UpdateEvent::Dismiss) => UpdateState::Idle,
            (UpdateState::Available { release }, UpdateEvent::DownloadStarted(total)) => {
                UpdateState::Downloading {
                    release,
                    current: 0,
                    total,
                }
            }
            (
                UpdateState::Downloading {
                    release,
                    current,
                    total,
                },
                UpdateEvent::Progress(count),
            ) => {
                let count = if total > 0 { count.min(total) } else { count };
                UpdateState::Downloading {
                    release,
                    current: current.max(count),
                    total,
                }
            }
            (UpdateState::Downloading { release, .. }, UpdateEvent::Verified) => {
                UpdateState::Complete { release }
            }
            (_, UpdateEvent::RestartAccepted) => UpdateState::Restarting,
            (_, UpdateEvent::Failed(message)) => UpdateState::Error { message },
            // can_transition admits nothing else
            (state, _) => state,
        };
        Ok(())
    }
}

/// Who asked for a check; decides how failures surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOrigin {
    Scheduled,
    User,
}

/// Fixed-interval check schedule driven from dispatcher housekeeping
#[derive(Debug, Clone)]
pub struct CheckSchedule {
    interval: Duration,
    next_due: Option<Instant>,
}

impl CheckSchedule {
    /// First check is due immediately.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            next_due: Some(Instant::now()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            next_due: None,
        }
    }

    /// Returns `true` once per elapsed interval.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}

/// Released when a check or download session ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs update checks and downloads off the consumer thread.
pub struct UpdateCoordinator {
    transport: Arc<dyn UpdateTransport>,
    commands: CommandSender,
    runtime: Handle,
    download_dir: PathBuf,
    in_flight: Arc<AtomicBool>,
}

impl UpdateCoordinator {
    pub fn new(
        transport: Arc<dyn UpdateTransport>,
        commands: CommandSender,
        runtime: Handle,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            commands,
            runtime,
            download_dir: download_dir.into(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A check or download session is running
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(&self.in_flight)))
    }

    /// Starts a version check. Returns `false` when another session is in flight.
    ///
    /// Emits `UpdateAvailable` or `NoUpdateFound`. A failed scheduled check is
    /// logged and reported as `NoUpdateFound`; a failed user check as `UpdateFailed`.
    pub fn check_for_updates(&self, origin: CheckOrigin) -> bool {
        let Some(guard) = self.try_acquire() else {
            debug!(?origin, "update session in flight; check dropped");
            return false;
        };
        let transport = Arc::clone(&self.transport);
        let commands = self.commands.clone();

        self.runtime.spawn(async move {
            let result = transport.check_version().await;
            drop(guard);
            match result {
                Ok(Some(release)) => {
                    info!(version = %release.version, "update available");
                    commands.send(Command::UpdateAvailable(release));
                }
                Ok(None) => {
                    debug!("no newer release");
                    commands.send(Command::NoUpdateFound);
                }
                Err(err) if origin == CheckOrigin::Scheduled => {
                    warn!(error = %err, network = err.is_network(), "background update check failed");
                    commands.send(Command::NoUpdateFound);
                }
                Err(err) => {
                    warn!(error = %err, "update check failed");
                    commands.send(Command::UpdateFailed(format!("update check failed: {err}")));
                }
            }
        });
        true
    }

    /// Downloads and verifies `release`. Returns `false` when another session is in flight.
    ///
    /// Emits `DownloadStarted` once, throttled `Progress`, then either
    /// `DownloadComplete` followed by `RestartReady`, or a single `UpdateFailed`.
    pub fn download(&self, release: ReleaseInfo) -> bool {
        let Some(guard) = self.try_acquire() else {
            debug!("update session in flight; download dropped");
            return false;
        };
        let transport = Arc::clone(&self.transport);
        let commands = self.commands.clone();
        let download_dir = self.download_dir.clone();
        let session = Uuid::new_v4();
        let span = tracing::info_span!("update_download", %session, version = %release.version);

        self.runtime.spawn(
            async move {
                info!(asset = %release.asset_name, size = release.size, "download starting");
                let mut reporter = ProgressReporter::new(commands.clone());
                let result =
                    fetch_verified(transport.as_ref(), &release, &download_dir, &mut reporter).await;
                drop(guard);

                match result {
                    Ok(path) => {
                        info!(path = %path.display(), "artifact downloaded and verified");
                        commands.send(Command::DownloadComplete);
                        commands.send(Command::RestartReady(path));
                    }
                    Err(err) => {
                        warn!(error = %err, integrity = err.is_integrity(), "update download failed");
                        commands.send(Command::UpdateFailed(format!("update download failed: {err}")));
                    }
                }
            }
            .instrument(span),
        );
        true
    }
}

async fn fetch_verified(
    transport: &dyn UpdateTransport,
    release: &ReleaseInfo,
    download_dir: &Path,
    reporter: &mut ProgressReporter,
) -> autofarm_updater::Result<PathBuf> {
    tokio::fs::create_dir_all(download_dir).await?;
    let path = transport
        .download_artifact(release, download_dir, reporter)
        .await?;
    reporter.finish();
    if let Err(err) = verify_artifact(&path, release).await {
        if let Err(remove_err) = tokio::fs::remove_file(&path).await {
            debug!(error = %remove_err, "failed to remove rejected artifact");
        }
        return Err(err);
    }
    Ok(path)
}

impl std::fmt::Debug for UpdateCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("download_dir", &self.download_dir)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Turns transport progress into throttled, monotone `Progress` commands.
struct ProgressReporter {
    commands: CommandSender,
    started: bool,
    total: u64,
    current: u64,
    last_sent: u64,
}

impl ProgressReporter {
    fn new(commands: CommandSender) -> Self {
        Self {
            commands,
            started: false,
            total: 0,
            current: 0,
            last_sent: 0,
        }
    }

    fn step(&self) -> u64 {
        if self.total > 0 {
            (self.total / 100).max(1)
        } else {
            UNKNOWN_TOTAL_STEP
        }
    }

    /// Flushes the final count if throttling held it back.
    fn finish(&mut self) {
        if self.current > self.last_sent {
            self.last_sent = self.current;
            self.commands.send(Command::Progress(self.current));
        }
    }
}

impl ProgressSink for ProgressReporter {
    fn started(&mut self, total: u64) {
        if self.started {
            return;
        }
        self.started = true;
        self.total = total;
        self.commands.send(Command::DownloadStarted(total));
    }

    fn advanced(&mut self, downloaded: u64) {
        if !self.started {
            self.started(0);
        }
        let downloaded = if self.total > 0 {
            downloaded.min(self.total)
        } else {
            downloaded
        };
        if downloaded <= self.current {
            return;
        }
        self.current = downloaded;
        let at_end = self.total > 0 && self.current == self.total;
        if at_end || self.current - self.last_sent >= self.step() {
            self.last_sent = self.current;
            self.commands.send(Command::Progress(self.current));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CommandQueue, command_queue};
    use async_trait::async_trait;
    use autofarm_updater::UpdateError;
    use tokio::sync::Notify;

    fn release(version: &str, payload: &[u8], sha256: Option<String>) -> ReleaseInfo {
        ReleaseInfo {
            version: version.to_string(),
            tag: format!("v{version}"),
            asset_name: "autofarm-bin".to_string(),
            download_url: "http://localhost/autofarm-bin".to_string(),
            size: payload.len() as u64,
            sha256,
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        release: Option<ReleaseInfo>,
        fail_check: bool,
        payload: Vec<u8>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl UpdateTransport for FakeTransport {
        async fn check_version(&self) -> autofarm_updater::Result<Option<ReleaseInfo>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_check {
                return Err(UpdateError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(self.release.clone())
        }

        async fn download_artifact(
            &self,
            release: &ReleaseInfo,
            dest_dir: &Path,
            progress: &mut (dyn ProgressSink + Send),
        ) -> autofarm_updater::Result<PathBuf> {
            progress.started(self.payload.len() as u64);
            let path = dest_dir.join(&release.asset_name);
            let mut written = 0u64;
            let mut data = Vec::new();
            for chunk in self.payload.chunks(7) {
                data.extend_from_slice(chunk);
                written += chunk.len() as u64;
                progress.advanced(written);
            }
            tokio::fs::write(&path, &data).await?;
            Ok(path)
        }
    }

    async fn drain_until(queue: &mut CommandQueue, done: impl Fn(&Command) -> bool) -> Vec<Command> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match queue.try_next() {
                Some(command) => {
                    let finished = done(&command);
                    seen.push(command);
                    if finished {
                        return seen;
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        panic!("timed out; saw {seen:?}");
    }

    fn coordinator(transport: FakeTransport, dir: &Path) -> (UpdateCoordinator, CommandQueue) {
        let (sender, queue) = command_queue();
        (
            UpdateCoordinator::new(Arc::new(transport), sender, Handle::current(), dir),
            queue,
        )
    }

    #[tokio::test]
    async fn check_reports_available_release_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport {
            release: Some(release("2.0.0", b"", None)),
            ..Default::default()
        };
        let (coordinator, mut queue) = coordinator(transport, dir.path());

        assert!(coordinator.check_for_updates(CheckOrigin::User));
        let seen = drain_until(&mut queue, |c| matches!(c, Command::UpdateAvailable(_))).await;
        assert_eq!(seen.len(), 1);
        let Command::UpdateAvailable(info) = &seen[0] else {
            unreachable!()
        };
        assert_eq!(info.version, "2.0.0");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_empty());
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn reentrant_check_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let transport = FakeTransport {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        let (coordinator, mut queue) = coordinator(transport, dir.path());

        assert!(coordinator.check_for_updates(CheckOrigin::Scheduled));
        assert!(!coordinator.check_for_updates(CheckOrigin::User));
        assert!(!coordinator.download(release("2.0.0", b"x", None)));
        gate.notify_one();

        let seen = drain_until(&mut queue, |c| matches!(c, Command::NoUpdateFound)).await;
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn failed_check_surfaces_by_origin() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, mut queue) = coordinator(
            FakeTransport {
                fail_check: true,
                ..Default::default()
            },
            dir.path(),
        );

        coordinator.check_for_updates(CheckOrigin::Scheduled);
        drain_until(&mut queue, |c| matches!(c, Command::NoUpdateFound)).await;

        while coordinator.is_busy() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        coordinator.check_for_updates(CheckOrigin::User);
        drain_until(&mut queue, |c| matches!(c, Command::UpdateFailed(_))).await;
    }

    #[tokio::test]
    async fn download_reports_ordered_progress_then_restart() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(1_000).collect();
        let transport = FakeTransport {
            payload: payload.clone(),
            ..Default::default()
        };
        let (coordinator, mut queue) = coordinator(transport, dir.path());

        assert!(coordinator.download(release("2.0.0", &payload, None)));
        let seen = drain_until(&mut queue, |c| matches!(c, Command::RestartReady(_))).await;

        assert!(matches!(seen[0], Command::DownloadStarted(1_000)));
        let progress: Vec<u64> = seen
            .iter()
            .filter_map(|c| match c {
                Command::Progress(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&1_000));
        assert!(progress.iter().all(|n| *n <= 1_000));

        let complete_at = seen
            .iter()
            .position(|c| matches!(c, Command::DownloadComplete))
            .unwrap();
        assert_eq!(complete_at, seen.len() - 2);
        assert_eq!(
            seen.iter().filter(|c| matches!(c, Command::DownloadComplete)).count(),
            1
        );
        let Command::RestartReady(path) = seen.last().unwrap() else {
            unreachable!()
        };
        assert_eq!(tokio::fs::read(path).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn integrity_failure_never_reaches_restart() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"tampered artifact".to_vec();
        let transport = FakeTransport {
            payload: payload.clone(),
            ..Default::default()
        };
        let (coordinator, mut queue) = coordinator(transport, dir.path());

        coordinator.download(release("2.0.0", &payload, Some("00".repeat(32))));
        let seen = drain_until(&mut queue, |c| matches!(c, Command::UpdateFailed(_))).await;
        assert!(!seen.iter().any(|c| matches!(
            c,
            Command::DownloadComplete | Command::RestartReady(_)
        )));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_empty());
        assert!(!dir.path().join("autofarm-bin").exists());
    }

    #[test]
    fn reporter_throttles_and_clamps() {
        let (sender, mut queue) = command_queue();
        let mut reporter = ProgressReporter::new(sender);
        reporter.started(1_000);
        reporter.started(5);
        for n in [3, 9, 10, 8, 25, 2_000] {
            reporter.advanced(n);
        }
        reporter.finish();

        let mut sent = Vec::new();
        while let Some(command) = queue.try_next() {
            sent.push(command);
        }
        assert!(matches!(sent[0], Command::DownloadStarted(1_000)));
        let progress: Vec<u64> = sent[1..]
            .iter()
            .map(|c| match c {
                Command::Progress(n) => *n,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(progress, vec![10, 25, 1_000]);
    }

    #[test]
    fn phase_machine_follows_download_path() {
        let info = release("2.0.0", b"abc", None);
        let mut machine = UpdateStateMachine::new();
        machine.transition(UpdateEvent::CheckStarted).unwrap();
        machine.transition(UpdateEvent::Found(info.clone())).unwrap();
        assert_eq!(machine.state().available_release(), Some(&info));

        machine.transition(UpdateEvent::DownloadStarted(3)).unwrap();
        machine.transition(UpdateEvent::Progress(2)).unwrap();
        machine.transition(UpdateEvent::Progress(1)).unwrap();
        machine.transition(UpdateEvent::Progress(9)).unwrap();
        assert!(matches!(
            machine.state(),
            UpdateState::Downloading { current: 3, total: 3, .. }
        ));

        machine.transition(UpdateEvent::Verified).unwrap();
        machine.transition(UpdateEvent::RestartAccepted).unwrap();
        assert_eq!(machine.state(), &UpdateState::Restarting);
    }

    #[test]
    fn phase_machine_rejects_out_of_order_events() {
        let mut machine = UpdateStateMachine::new();
        assert_eq!(
            machine.transition(UpdateEvent::RestartAccepted),
            Err(UpdateStateError::InvalidTransition {
                from: "idle",
                event: "restart_accepted",
            })
        );
        machine.transition(UpdateEvent::CheckStarted).unwrap();
        assert!(!machine.can_transition(&UpdateEvent::CheckStarted));
        machine.transition(UpdateEvent::NotFound).unwrap();
        assert_eq!(machine.state(), &UpdateState::Idle);

        machine.transition(UpdateEvent::CheckStarted).unwrap();
        machine.transition(UpdateEvent::Failed("offline".into())).unwrap();
        machine.transition(UpdateEvent::Dismiss).unwrap();
        assert_eq!(machine.state(), &UpdateState::Idle);
    }

    #[test]
    fn schedule_fires_at_start_then_per_interval() {
        let mut schedule = CheckSchedule::every(Duration::from_secs(60));
        let start = Instant::now();
        assert!(schedule.poll(start));
        assert!(!schedule.poll(start + Duration::from_secs(30)));
        assert!(schedule.poll(start + Duration::from_secs(61)));
        assert!(!CheckSchedule::disabled().poll(start));
    }
}
