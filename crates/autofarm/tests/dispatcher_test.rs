mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use autofarm::dispatcher::{ExitPolicy, ExitReason};
use autofarm::task::WorkerState;
use autofarm::update::UpdateState;
use autofarm::Command;
use autofarm_updater::ReleaseInfo;

use common::{RecordingExecutor, dispatcher_with, pump_until, settings};

#[test]
fn second_start_is_rejected_while_first_runs() {
    let executor = Arc::new(RecordingExecutor::default());
    let (mut dispatcher, _dir) = dispatcher_with(executor.clone(), ExitPolicy::UntilShutdown);
    let sender = dispatcher.sender();

    sender.send(Command::Start(settings("a")));
    sender.send(Command::Start(settings("b")));
    pump_until(&mut dispatcher, |d| d.queued() == 0 && d.ui().task_active);

    assert_eq!(dispatcher.ui().task_label.as_deref(), Some("Dungeon a"));
    assert!(matches!(dispatcher.ui().worker, WorkerState::Running(_)));
    pump_until(&mut dispatcher, |_| executor.targets().len() == 1);
    assert_eq!(executor.targets(), vec!["a"]);

    sender.send(Command::Shutdown);
    pump_until(&mut dispatcher, |d| d.exit_reason().is_some());
    assert_eq!(executor.max_live.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_without_worker_is_silent() {
    let (mut dispatcher, _dir) =
        dispatcher_with(Arc::new(RecordingExecutor::default()), ExitPolicy::UntilShutdown);
    dispatcher.sender().send(Command::Stop);

    assert!(dispatcher.tick());
    assert!(!dispatcher.tick());
    assert_eq!(dispatcher.queued(), 0);
    assert!(dispatcher.ui().notices.is_empty());
    assert!(dispatcher.ui().modal.is_none());
    assert_eq!(dispatcher.ui().worker, WorkerState::Idle);
}

#[test]
fn stop_reaches_checkpoint_and_notifies() {
    let (mut dispatcher, _dir) =
        dispatcher_with(Arc::new(RecordingExecutor::default()), ExitPolicy::UntilShutdown);
    let sender = dispatcher.sender();

    sender.send(Command::Start(settings("a")));
    pump_until(&mut dispatcher, |d| d.ui().task_active);

    sender.send(Command::Stop);
    assert!(dispatcher.tick());
    assert!(!dispatcher.ui().controls_enabled);
    assert!(matches!(dispatcher.ui().worker, WorkerState::Stopping(_)));

    pump_until(&mut dispatcher, |d| {
        d.ui().notices.iter().any(|n| n.title == "Task stopped")
    });
    let ui = dispatcher.ui();
    assert!(!ui.task_active);
    assert!(ui.controls_enabled);
    assert_eq!(ui.worker, WorkerState::Idle);
    assert!(!dispatcher.workers().is_live());
}

#[test]
fn staged_restarts_collapse_to_newest_settings() {
    let executor = Arc::new(RecordingExecutor::default());
    let (mut dispatcher, _dir) = dispatcher_with(executor.clone(), ExitPolicy::UntilShutdown);
    let sender = dispatcher.sender();

    sender.send(Command::Start(settings("a")));
    pump_until(&mut dispatcher, |_| executor.targets().len() == 1);
    let first = dispatcher.workers().live_id().unwrap();

    sender.send(Command::RestartTask(Some(settings("b"))));
    sender.send(Command::RestartTask(Some(settings("c"))));
    assert!(dispatcher.tick());
    // still the original worker; nothing spawned yet
    assert_eq!(dispatcher.workers().live_id(), Some(first));

    pump_until(&mut dispatcher, |_| executor.targets().len() == 2);
    pump_until(&mut dispatcher, |d| d.queued() == 0 && d.ui().task_active);
    assert_eq!(executor.targets(), vec!["a", "c"]);
    assert_eq!(dispatcher.ui().task_label.as_deref(), Some("Dungeon c"));
    assert!(!dispatcher.workers().has_pending());

    sender.send(Command::Stop);
    pump_until(&mut dispatcher, |d| !d.workers().is_live());
    assert_eq!(executor.targets().len(), 2);
    assert_eq!(executor.max_live.load(Ordering::SeqCst), 1);
}

#[test]
fn out_of_revival_hands_off_to_fallback_target() {
    let executor = Arc::new(RecordingExecutor::handing_off());
    let (mut dispatcher, _dir) = dispatcher_with(executor.clone(), ExitPolicy::UntilShutdown);
    let sender = dispatcher.sender();

    sender.send(Command::Start(settings("deep")));
    pump_until(&mut dispatcher, |d| d.ui().fallback_mode && d.ui().task_active);
    pump_until(&mut dispatcher, |_| executor.targets().len() == 2);

    assert_eq!(executor.targets(), vec!["deep", autofarm::settings::FALLBACK_TARGET]);
    assert_eq!(executor.max_live.load(Ordering::SeqCst), 1);

    sender.send(Command::Shutdown);
    pump_until(&mut dispatcher, |d| d.exit_reason().is_some());
    assert_eq!(dispatcher.exit_reason(), Some(&ExitReason::Shutdown));
}

#[test]
fn fallback_restart_without_history_is_an_error() {
    let (mut dispatcher, _dir) =
        dispatcher_with(Arc::new(RecordingExecutor::default()), ExitPolicy::UntilShutdown);
    dispatcher.sender().send(Command::RestartTask(None));
    pump_until(&mut dispatcher, |d| d.queued() == 0 && d.ui().modal.is_some());

    let modal = dispatcher.ui().modal.clone().unwrap();
    assert!(modal.body.contains("no previous task"));
    assert!(!dispatcher.workers().is_live());
}

#[test]
fn update_available_moves_to_available_once() {
    let (mut dispatcher, _dir) =
        dispatcher_with(Arc::new(RecordingExecutor::default()), ExitPolicy::UntilShutdown);
    let release = ReleaseInfo {
        version: "2.0.0".to_string(),
        tag: "v2.0.0".to_string(),
        asset_name: "autofarm".to_string(),
        download_url: "http://localhost/autofarm".to_string(),
        size: 42,
        sha256: None,
    };
    dispatcher.sender().send(Command::UpdateAvailable(release.clone()));
    pump_until(&mut dispatcher, |d| d.queued() == 0);

    assert_eq!(
        dispatcher.update_state(),
        &UpdateState::Available { release }
    );
    let announcements = dispatcher
        .ui()
        .notices
        .iter()
        .filter(|n| n.title == "Update available")
        .count();
    assert_eq!(announcements, 1);
}

#[test]
fn headless_policy_exits_after_invalid_start() {
    let (mut dispatcher, _dir) =
        dispatcher_with(Arc::new(RecordingExecutor::default()), ExitPolicy::WhenTaskIdle);
    let mut invalid = settings("a");
    invalid.adb_port = 0;
    dispatcher.sender().send(Command::Start(invalid));
    pump_until(&mut dispatcher, |d| d.exit_reason().is_some());

    let reason = dispatcher.exit_reason().cloned().unwrap();
    assert!(matches!(&reason, ExitReason::StartRejected(message) if message.contains("adb_port")));
    assert!(!reason.is_success());
}

#[test]
fn shutdown_waits_for_worker_to_retire() {
    let (mut dispatcher, _dir) =
        dispatcher_with(Arc::new(RecordingExecutor::default()), ExitPolicy::UntilShutdown);
    let sender = dispatcher.sender();
    sender.send(Command::Start(settings("a")));
    pump_until(&mut dispatcher, |d| d.ui().task_active);

    sender.send(Command::Shutdown);
    assert!(dispatcher.tick());
    assert!(dispatcher.is_draining());
    assert!(dispatcher.exit_reason().is_none());

    pump_until(&mut dispatcher, |d| d.exit_reason().is_some());
    assert_eq!(dispatcher.exit_reason(), Some(&ExitReason::Shutdown));
    assert!(!dispatcher.workers().is_live());
    assert!(
        dispatcher
            .ui()
            .notices
            .iter()
            .all(|n| n.title != "Task failed")
    );
}
