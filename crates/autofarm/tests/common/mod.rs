/*
[INPUT]:  Test settings, dispatcher configuration
[OUTPUT]: Shared executors, dispatcher fixtures and polling helpers
[POS]:    Test infrastructure - shared across autofarm integration tests
[UPDATE]: When adding new test executors or fixtures
*/

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use autofarm::dispatcher::{Dispatcher, DispatcherConfig, ExitPolicy};
use autofarm::settings::{ConfigStore, TaskSettings};
use autofarm::task::{TaskConfig, TaskExecutor};
use autofarm::TaskOutcome;

/// Records every run; runs until cancelled unless `hand_off` is set.
#[derive(Default)]
pub struct RecordingExecutor {
    live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub targets: Mutex<Vec<String>>,
    /// Non-fallback runs request a fallback restart and return at once
    pub hand_off: bool,
}

impl RecordingExecutor {
    pub fn handing_off() -> Self {
        Self {
            hand_off: true,
            ..Self::default()
        }
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

impl TaskExecutor for RecordingExecutor {
    fn run(&self, config: &TaskConfig) -> anyhow::Result<TaskOutcome> {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
        self.targets
            .lock()
            .unwrap()
            .push(config.settings.farm_target.clone());

        let outcome = if self.hand_off && !config.settings.is_fallback_target() {
            config.request_restart(None);
            TaskOutcome::Completed { runs: 1 }
        } else {
            while !config.checkpoint() {
                thread::sleep(Duration::from_millis(2));
            }
            TaskOutcome::Cancelled
        };

        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }
}

pub fn settings(target: &str) -> TaskSettings {
    TaskSettings {
        runner_command: "farm-step".to_string(),
        farm_target: target.to_string(),
        farm_target_text: format!("Dungeon {target}"),
        ..TaskSettings::default()
    }
}

pub fn test_config(policy: ExitPolicy) -> DispatcherConfig {
    DispatcherConfig {
        poll_interval: Duration::from_millis(5),
        shutdown_drain: Duration::from_secs(2),
        notice_history: 32,
        exit_policy: policy,
    }
}

pub fn dispatcher_with(
    executor: Arc<dyn TaskExecutor>,
    policy: ExitPolicy,
) -> (Dispatcher, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("config.json"));
    (Dispatcher::new(test_config(policy), executor, store), dir)
}

/// Ticks until `done` holds; panics after five seconds.
pub fn pump_until(dispatcher: &mut Dispatcher, done: impl Fn(&Dispatcher) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(dispatcher) {
        assert!(
            Instant::now() < deadline,
            "condition not reached: {dispatcher:?}"
        );
        if !dispatcher.tick() {
            thread::sleep(Duration::from_millis(2));
        }
    }
}

/// Async variant for tests that also drive a tokio runtime.
pub async fn pump_until_async(dispatcher: &mut Dispatcher, done: impl Fn(&Dispatcher) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(dispatcher) {
        assert!(
            Instant::now() < deadline,
            "condition not reached: {dispatcher:?}"
        );
        if !dispatcher.tick() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}
