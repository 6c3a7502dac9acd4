/*
[INPUT]:  TaskConfig (settings snapshot, cancellation token, command sender)
[OUTPUT]: Step-by-step farm runs through an external runner process
[POS]:    Execution layer - default TaskExecutor
[UPDATE]: When changing the runner protocol (env vars, exit codes)
*/

use std::process::{Command as Process, Stdio};
use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::command::{Notice, TaskOutcome};
use crate::settings::TaskSettings;
use crate::task::{TaskConfig, TaskExecutor};

const EXIT_CONTINUE: i32 = 0;
const EXIT_OUT_OF_REVIVAL: i32 = 3;
const EXIT_TARGET_FINISHED: i32 = 4;

/// What one step reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Continue,
    /// The party has no revival resources left
    OutOfRevival,
    TargetFinished,
}

/// Runs a single farm step to completion.
pub trait StepRunner: Send + Sync + 'static {
    fn run_step(&self, settings: &TaskSettings, run: u64) -> anyhow::Result<StepResult>;
}

/// Spawns `runner_command runner_args..` once per step.
///
/// The child sees `AUTOFARM_EMULATOR`, `AUTOFARM_ADB_PORT`, `AUTOFARM_TARGET`,
/// `AUTOFARM_RUN` and the full persisted settings object as `AUTOFARM_SETTINGS`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandStepRunner;

impl StepRunner for CommandStepRunner {
    fn run_step(&self, settings: &TaskSettings, run: u64) -> anyhow::Result<StepResult> {
        let mut object = Map::new();
        settings.write_into(&mut object);
        let settings_json =
            serde_json::to_string(&Value::Object(object)).context("serialize step settings")?;

        let status = Process::new(&settings.runner_command)
            .args(&settings.runner_args)
            .env("AUTOFARM_EMULATOR", &settings.emulator_path)
            .env("AUTOFARM_ADB_PORT", settings.adb_port.to_string())
            .env("AUTOFARM_TARGET", &settings.farm_target)
            .env("AUTOFARM_RUN", run.to_string())
            .env("AUTOFARM_SETTINGS", settings_json)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("spawn runner {}", settings.runner_command))?;

        match status.code() {
            Some(EXIT_CONTINUE) => Ok(StepResult::Continue),
            Some(EXIT_OUT_OF_REVIVAL) => Ok(StepResult::OutOfRevival),
            Some(EXIT_TARGET_FINISHED) => Ok(StepResult::TargetFinished),
            _ => bail!("runner exited with {status}"),
        }
    }
}

/// Default executor: runs steps until cancelled, finished or out of budget.
#[derive(Clone)]
pub struct FarmExecutor {
    runner: Arc<dyn StepRunner>,
}

impl FarmExecutor {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self { runner }
    }

    pub fn with_process_runner() -> Self {
        Self::new(Arc::new(CommandStepRunner))
    }
}

impl TaskExecutor for FarmExecutor {
    fn run(&self, config: &TaskConfig) -> anyhow::Result<TaskOutcome> {
        let settings = config.settings.as_ref();
        let budget = u64::try_from(settings.max_runs).unwrap_or(0);
        let mut runs = 0u64;

        loop {
            if config.checkpoint() {
                info!(runs, "cancellation observed at checkpoint");
                return Ok(TaskOutcome::Cancelled);
            }
            if budget > 0 && runs >= budget {
                info!(runs, "run budget used");
                return Ok(TaskOutcome::Completed { runs });
            }

            runs += 1;
            debug!(run = runs, target_label = %settings.target_label(), "step starting");
            let step = self
                .runner
                .run_step(settings, runs)
                .with_context(|| format!("step {runs} on {}", settings.target_label()))?;

            match step {
                StepResult::Continue => {}
                StepResult::TargetFinished => {
                    info!(runs, "farm target finished");
                    return Ok(TaskOutcome::Completed { runs });
                }
                StepResult::OutOfRevival if settings.is_fallback_target() => {
                    warn!(runs, "out of revival resources on the fallback target");
                    config.notify(Notice::warning(
                        "Out of revival resources",
                        "Already on the fallback target; stopping.",
                    ));
                    return Ok(TaskOutcome::Completed { runs });
                }
                StepResult::OutOfRevival => {
                    info!(runs, "out of revival resources; handing off to fallback target");
                    config.request_restart(None);
                    return Ok(TaskOutcome::Completed { runs });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, WorkerId};
    use crate::queue::command_queue;
    use crate::settings::FALLBACK_TARGET;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Scripted {
        steps: Mutex<Vec<StepResult>>,
        cancel_after: Option<(u64, CancellationToken)>,
    }

    impl Scripted {
        fn new(mut steps: Vec<StepResult>) -> Self {
            steps.reverse();
            Self {
                steps: Mutex::new(steps),
                cancel_after: None,
            }
        }
    }

    impl StepRunner for Scripted {
        fn run_step(&self, _settings: &TaskSettings, run: u64) -> anyhow::Result<StepResult> {
            if let Some((after, token)) = &self.cancel_after {
                if run >= *after {
                    token.cancel();
                }
            }
            self.steps
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn config_for(settings: TaskSettings, cancel: CancellationToken) -> (TaskConfig, crate::queue::CommandQueue) {
        let (sender, queue) = command_queue();
        (
            TaskConfig::new(WorkerId(1), Arc::new(settings), cancel, sender),
            queue,
        )
    }

    #[test]
    fn stops_when_target_finished() {
        let executor = FarmExecutor::new(Arc::new(Scripted::new(vec![
            StepResult::Continue,
            StepResult::TargetFinished,
        ])));
        let (config, _queue) = config_for(TaskSettings::default(), CancellationToken::new());
        assert_eq!(executor.run(&config).unwrap(), TaskOutcome::Completed { runs: 2 });
    }

    #[test]
    fn honours_run_budget() {
        let executor = FarmExecutor::new(Arc::new(Scripted::new(vec![StepResult::Continue; 5])));
        let settings = TaskSettings {
            max_runs: 3,
            ..TaskSettings::default()
        };
        let (config, _queue) = config_for(settings, CancellationToken::new());
        assert_eq!(executor.run(&config).unwrap(), TaskOutcome::Completed { runs: 3 });
    }

    #[test]
    fn cancellation_is_observed_between_steps() {
        let cancel = CancellationToken::new();
        let mut runner = Scripted::new(vec![StepResult::Continue; 10]);
        runner.cancel_after = Some((2, cancel.clone()));
        let executor = FarmExecutor::new(Arc::new(runner));
        let (config, _queue) = config_for(TaskSettings::default(), cancel);
        assert_eq!(executor.run(&config).unwrap(), TaskOutcome::Cancelled);
    }

    #[test]
    fn out_of_revival_requests_fallback_restart() {
        let executor = FarmExecutor::new(Arc::new(Scripted::new(vec![StepResult::OutOfRevival])));
        let (config, mut queue) = config_for(TaskSettings::default(), CancellationToken::new());
        assert_eq!(executor.run(&config).unwrap(), TaskOutcome::Completed { runs: 1 });
        assert!(matches!(queue.try_next(), Some(Command::RestartTask(None))));
    }

    #[test]
    fn out_of_revival_on_fallback_does_not_loop() {
        let executor = FarmExecutor::new(Arc::new(Scripted::new(vec![StepResult::OutOfRevival])));
        let settings = TaskSettings {
            farm_target: FALLBACK_TARGET.to_string(),
            ..TaskSettings::default()
        };
        let (config, mut queue) = config_for(settings, CancellationToken::new());
        executor.run(&config).unwrap();
        assert!(matches!(queue.try_next(), Some(Command::Notify(_))));
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn step_error_fails_the_run() {
        let executor = FarmExecutor::new(Arc::new(Scripted::new(vec![])));
        let (config, _queue) = config_for(TaskSettings::default(), CancellationToken::new());
        let err = executor.run(&config).unwrap_err();
        assert!(format!("{err:#}").contains("script exhausted"));
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_maps_exit_codes() {
        let settings = |code: i32| TaskSettings {
            runner_command: "sh".to_string(),
            runner_args: vec!["-c".to_string(), format!("exit {code}")],
            ..TaskSettings::default()
        };
        let runner = CommandStepRunner;
        assert_eq!(runner.run_step(&settings(0), 1).unwrap(), StepResult::Continue);
        assert_eq!(runner.run_step(&settings(3), 1).unwrap(), StepResult::OutOfRevival);
        assert_eq!(runner.run_step(&settings(4), 1).unwrap(), StepResult::TargetFinished);
        assert!(runner.run_step(&settings(7), 1).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_passes_settings_through_env() {
        let settings = TaskSettings {
            runner_command: "sh".to_string(),
            runner_args: vec![
                "-c".to_string(),
                "[ \"$AUTOFARM_TARGET\" = dungeon-x ] && [ \"$AUTOFARM_RUN\" = 5 ] && [ \"$AUTOFARM_ADB_PORT\" = 5555 ]"
                    .to_string(),
            ],
            farm_target: "dungeon-x".to_string(),
            ..TaskSettings::default()
        };
        assert_eq!(
            CommandStepRunner.run_step(&settings, 5).unwrap(),
            StepResult::Continue
        );
    }
}
