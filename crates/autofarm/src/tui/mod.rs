/*
[INPUT]:  Dispatcher (owned; this loop is the consumer thread), log buffer, key presses
[OUTPUT]: Ratatui front end that renders UiState and turns keys into Commands
[POS]:    TUI module for the autofarm binary
[UPDATE]: When changing TUI keybindings or how the loop drives the dispatcher
*/

mod input;
mod terminal;
mod view;

use std::time::Duration;

use anyhow::Result;
use autofarm::logging::LogBufferHandle;
use autofarm::{Command, CommandSender, Dispatcher, ExitReason};
use crossterm::event::Event as CrosstermEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use input::{UiAction, action_for};
use terminal::TerminalGuard;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Bounds how many commands are handled between two redraws
const MAX_COMMANDS_PER_FRAME: usize = 64;

enum UiEvent {
    Input(CrosstermEvent),
}

/// Runs the dispatcher on this task and redraws after every tick or key press.
pub async fn run_tui(mut dispatcher: Dispatcher, log_buffer: LogBufferHandle) -> Result<ExitReason> {
    let mut terminal = TerminalGuard::new()?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let input_shutdown = CancellationToken::new();
    let input_shutdown_clone = input_shutdown.clone();

    tokio::task::spawn_blocking(move || {
        while !input_shutdown_clone.is_cancelled() {
            if crossterm::event::poll(INPUT_POLL_INTERVAL).unwrap_or(false) {
                if let Ok(event) = crossterm::event::read() {
                    let _ = event_tx.send(UiEvent::Input(event));
                }
            }
        }
    });

    let sender = dispatcher.sender();
    let mut tick = tokio::time::interval(dispatcher.poll_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            _ = tick.tick() => {
                for _ in 0..MAX_COMMANDS_PER_FRAME {
                    if !dispatcher.tick() {
                        break;
                    }
                }
            }
            Some(UiEvent::Input(event)) = event_rx.recv() => {
                if let CrosstermEvent::Key(key) = event {
                    if let Some(action) = action_for(key, dispatcher.ui().modal.is_some()) {
                        apply_action(&mut dispatcher, &sender, action);
                    }
                }
            }
        }

        if let Some(reason) = dispatcher.exit_reason().cloned() {
            break Ok(reason);
        }
        if let Err(err) = terminal.draw(|frame| view::draw(frame, dispatcher.ui(), &log_buffer)) {
            break Err(err);
        }
    };

    input_shutdown.cancel();
    result
}

fn apply_action(dispatcher: &mut Dispatcher, sender: &CommandSender, action: UiAction) {
    let controls_enabled = dispatcher.ui().controls_enabled;
    match action {
        UiAction::ToggleTask if !controls_enabled => {}
        UiAction::ToggleTask if dispatcher.ui().task_active => {
            sender.send(Command::Stop);
        }
        UiAction::ToggleTask => match dispatcher.store().load() {
            Ok(settings) => {
                sender.send(Command::Start(settings));
            }
            Err(err) => {
                warn!(error = %err, "cannot load task settings");
                sender.send(Command::Error(err.to_string()));
            }
        },
        UiAction::Restart if !controls_enabled => {}
        UiAction::Restart => match dispatcher.store().load() {
            Ok(settings) => {
                sender.send(Command::RestartTask(Some(settings)));
            }
            Err(err) => {
                sender.send(Command::Error(err.to_string()));
            }
        },
        UiAction::CheckUpdates => {
            sender.send(Command::CheckForUpdates);
        }
        UiAction::Download => {
            sender.send(Command::DownloadUpdate);
        }
        UiAction::Dismiss => dispatcher.dismiss_modal(),
        UiAction::Quit => {
            sender.send(Command::Shutdown);
        }
    }
}
