/*
[INPUT]:  CLI arguments, task settings file, app config, OS shutdown signals
[OUTPUT]: Headless task run or interactive terminal UI, with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
[UPDATE]: The updated build starts only after the front end has released the terminal
*/

mod tui;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use autofarm::config::UpdateConfig;
use autofarm::dispatcher::enqueue_stored_start;
use autofarm::logging::{self, LOG_BUFFER_CAPACITY, LogBuffer, LogTarget};
use autofarm::relaunch::{ProcessRelauncher, Relauncher};
use autofarm::update::UpdateCoordinator;
use autofarm::{
    AppConfig, CheckSchedule, Command, CommandSender, ConfigStore, Dispatcher, DispatcherConfig,
    ExitPolicy, ExitReason, FarmExecutor,
};
use autofarm_updater::ReleaseClient;
use clap::Parser;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "autofarm", version, about = "Automated farming runner with self-update")]
struct Cli {
    /// Load settings from disk, start the task once and exit when it is done
    #[arg(long)]
    headless: bool,
    /// Task settings file (JSON)
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    /// Application config file (TOML)
    #[arg(long = "app-config", value_name = "PATH")]
    app_config: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    let app_config_path = args.app_config.clone().or_else(AppConfig::default_path);
    let app_config = AppConfig::load(app_config_path.as_deref())?;

    let log_buffer = LogBuffer::handle(LOG_BUFFER_CAPACITY);
    let target = if args.headless {
        LogTarget::Stdout
    } else {
        LogTarget::Buffer {
            buffer: log_buffer.clone(),
            log_dir: logging::default_log_dir(),
        }
    };
    let _log_guard = logging::init_tracing(&args.log_level, target)?;
    logging::install_panic_hook();

    let store_path = match args.config_path {
        Some(path) => path,
        None => ConfigStore::default_path().context("resolve task settings path")?,
    };
    info!(
        version = VERSION,
        config_path = %store_path.display(),
        headless = args.headless,
        "starting autofarm"
    );

    let policy = if args.headless {
        ExitPolicy::WhenTaskIdle
    } else {
        ExitPolicy::UntilShutdown
    };
    let mut dispatcher = Dispatcher::new(
        DispatcherConfig::from_settings(&app_config.dispatcher, policy),
        Arc::new(FarmExecutor::with_process_runner()),
        ConfigStore::new(store_path),
    );
    dispatcher.record_running_version(VERSION);
    setup_signal_handlers(dispatcher.sender());

    let reason = if args.headless {
        if let Err(err) = enqueue_stored_start(&dispatcher) {
            error!(error = %format!("{err:#}"), "cannot start task");
            return Ok(ExitCode::FAILURE);
        }
        dispatcher.run().await
    } else {
        attach_updates(&mut dispatcher, &app_config.update);
        tui::run_tui(dispatcher, log_buffer).await?
    };

    report_exit(&reason);
    if let ExitReason::Relaunched(artifact) = &reason {
        if let Err(err) = ProcessRelauncher::from_env().launch(artifact) {
            error!(error = %format!("{err:#}"), "updated build did not start");
            eprintln!("autofarm: updated build did not start: {err:#}");
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(if reason.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn attach_updates(dispatcher: &mut Dispatcher, config: &UpdateConfig) {
    if !config.enabled {
        info!("update checks disabled");
        return;
    }
    let client = match ReleaseClient::new(config.release_source(), VERSION) {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "update client unavailable; checks disabled");
            return;
        }
    };
    let coordinator = UpdateCoordinator::new(
        Arc::new(client),
        dispatcher.sender(),
        tokio::runtime::Handle::current(),
        config.resolved_download_dir(),
    );
    dispatcher.set_updates(coordinator, CheckSchedule::every(config.check_interval()));
}

fn report_exit(reason: &ExitReason) {
    match reason {
        ExitReason::Shutdown => info!("shutdown complete"),
        ExitReason::Relaunched(path) => info!(path = %path.display(), "handing over to updated build"),
        ExitReason::TaskIdle(outcome) => info!(?outcome, "task finished"),
        ExitReason::StartRejected(message) => error!(%message, "task settings rejected"),
    }
}

/// SIGINT and SIGTERM enqueue `Shutdown`; the dispatcher drains the worker.
fn setup_signal_handlers(sender: CommandSender) {
    let sigint_sender = sender.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        sigint_sender.send(Command::Shutdown);
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    sender.send(Command::Shutdown);
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }

    #[cfg(not(unix))]
    drop(sender);
}
