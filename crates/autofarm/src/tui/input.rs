/*
[INPUT]:  Crossterm key events, whether a modal is open
[OUTPUT]: UiAction for the TUI loop to turn into Commands
[POS]:    TUI key bindings
[UPDATE]: When adding or changing hotkeys
*/

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum UiAction {
    /// Start when idle, stop when running
    ToggleTask,
    Restart,
    CheckUpdates,
    Download,
    Dismiss,
    Quit,
}

/// While a modal is open only dismiss and quit are accepted.
pub(super) fn action_for(key: KeyEvent, modal_open: bool) -> Option<UiAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UiAction::Quit);
    }

    match (key.code, modal_open) {
        (KeyCode::Enter | KeyCode::Esc, true) => Some(UiAction::Dismiss),
        (KeyCode::Char('q'), _) => Some(UiAction::Quit),
        (_, true) => None,
        (KeyCode::Char('s'), false) => Some(UiAction::ToggleTask),
        (KeyCode::Char('r'), false) => Some(UiAction::Restart),
        (KeyCode::Char('c'), false) => Some(UiAction::CheckUpdates),
        (KeyCode::Char('d'), false) => Some(UiAction::Download),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn modal_blocks_task_keys() {
        assert_eq!(action_for(key(KeyCode::Char('s')), true), None);
        assert_eq!(action_for(key(KeyCode::Enter), true), Some(UiAction::Dismiss));
        assert_eq!(action_for(key(KeyCode::Char('q')), true), Some(UiAction::Quit));
    }

    #[test]
    fn hotkeys_map_without_modal() {
        assert_eq!(action_for(key(KeyCode::Char('s')), false), Some(UiAction::ToggleTask));
        assert_eq!(action_for(key(KeyCode::Char('d')), false), Some(UiAction::Download));
        assert_eq!(action_for(key(KeyCode::Esc), false), None);
        assert_eq!(
            action_for(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL), false),
            Some(UiAction::Quit)
        );
    }
}
