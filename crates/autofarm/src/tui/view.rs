/*
[INPUT]:  UiState from the dispatcher, LogBufferHandle
[OUTPUT]: One ratatui frame: status, update progress, notices, logs, hotkeys, modal
[POS]:    TUI rendering - read-only view of dispatcher state
[UPDATE]: When changing the TUI layout
*/

use std::sync::PoisonError;

use autofarm::UiState;
use autofarm::command::{Notice, Severity};
use autofarm::logging::LogBufferHandle;
use autofarm::task::WorkerState;
use autofarm::update::UpdateState;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Wrap};

pub(super) fn draw(frame: &mut ratatui::Frame, ui: &UiState, logs: &LogBufferHandle) {
    let area = frame.area();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Length(8),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(area);

    draw_status(frame, layout[0], ui);
    draw_update(frame, layout[1], ui);
    draw_notices(frame, layout[2], ui);
    draw_logs(frame, layout[3], logs);
    draw_footer(frame, layout[4], ui);

    if let Some(notice) = &ui.modal {
        draw_modal(frame, centered_rect(area, 60, 40), notice);
    }
}

fn border_style() -> Style {
    Style::default().fg(Color::Magenta)
}

fn block(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(border_style())
        .title(title)
}

fn draw_status(frame: &mut ratatui::Frame, area: Rect, ui: &UiState) {
    let worker = match ui.worker {
        WorkerState::Idle => "idle".to_string(),
        WorkerState::Running(id) => format!("{id} running"),
        WorkerState::Stopping(id) => format!("{id} stopping"),
    };
    let mut first = vec![
        Span::styled(
            ui.status.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  |  worker: {worker}")),
    ];
    if ui.fallback_mode {
        first.push(Span::styled(
            "  FALLBACK TARGET",
            Style::default().fg(Color::Black).bg(Color::Yellow),
        ));
    }
    let target = ui
        .task_label
        .clone()
        .or_else(|| ui.settings.as_ref().map(|s| s.target_label().to_string()))
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "-".to_string());
    let second = Line::from(format!("target: {target}"));

    let widget = Paragraph::new(Text::from(vec![Line::from(first), second])).block(block("Task"));
    frame.render_widget(widget, area);
}

fn draw_update(frame: &mut ratatui::Frame, area: Rect, ui: &UiState) {
    if let Some((current, total)) = ui.download_progress() {
        let ratio = if total > 0 {
            (current as f64 / total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let gauge = Gauge::default()
            .block(block("Update"))
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(ratio)
            .label(format!("{} / {} KiB", current / 1024, total / 1024));
        frame.render_widget(gauge, area);
        return;
    }

    let text = match &ui.update {
        UpdateState::Idle => "up to date".to_string(),
        UpdateState::Checking => "checking for updates".to_string(),
        UpdateState::Available { release } => format!("version {} available", release.version),
        UpdateState::Downloading { .. } => "downloading".to_string(),
        UpdateState::Complete { release } => format!("version {} ready", release.version),
        UpdateState::Restarting => "restarting".to_string(),
        UpdateState::Error { message } => format!("error: {message}"),
    };
    frame.render_widget(Paragraph::new(text).block(block("Update")), area);
}

fn severity_style(severity: Severity) -> Style {
    match severity {
        Severity::Info => Style::default(),
        Severity::Warning => Style::default().fg(Color::Yellow),
        Severity::Error => Style::default().fg(Color::Red),
    }
}

fn draw_notices(frame: &mut ratatui::Frame, area: Rect, ui: &UiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = ui
        .notices
        .iter()
        .rev()
        .take(visible)
        .map(|notice| {
            ListItem::new(Line::from(vec![
                Span::raw(notice.at.format("%H:%M:%S ").to_string()),
                Span::styled(notice.title.clone(), severity_style(notice.severity)),
                Span::raw(format!(": {}", notice.body)),
            ]))
        })
        .collect();
    frame.render_widget(List::new(items).block(block("Notifications")), area);
}

fn draw_logs(frame: &mut ratatui::Frame, area: Rect, buffer: &LogBufferHandle) {
    let available = area.height.saturating_sub(2) as usize;
    let lines = buffer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .tail(available);
    let text = lines.into_iter().map(Line::from).collect::<Vec<_>>();
    frame.render_widget(Paragraph::new(text).block(block("Logs")), area);
}

fn draw_footer(frame: &mut ratatui::Frame, area: Rect, ui: &UiState) {
    let key_style = Style::default()
        .fg(Color::Black)
        .bg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    let toggle = if ui.task_active { " Stop  " } else { " Start  " };
    let mut spans = vec![
        Span::styled("[s]", key_style),
        Span::raw(toggle),
        Span::styled("[r]", key_style),
        Span::raw(" Restart  "),
        Span::styled("[c]", key_style),
        Span::raw(" Check updates  "),
    ];
    if ui.update.available_release().is_some() {
        spans.push(Span::styled("[d]", key_style));
        spans.push(Span::raw(" Download  "));
    }
    spans.push(Span::styled("[q]", key_style));
    spans.push(Span::raw(" Quit"));
    if !ui.controls_enabled {
        spans.push(Span::raw("  (waiting for worker)"));
    }

    let widget = Paragraph::new(Line::from(spans))
        .block(block("Hotkeys"))
        .wrap(Wrap { trim: true });
    frame.render_widget(widget, area);
}

fn draw_modal(frame: &mut ratatui::Frame, area: Rect, notice: &Notice) {
    frame.render_widget(Clear, area);
    let text = Text::from(vec![
        Line::from(Span::styled(
            notice.body.clone(),
            severity_style(notice.severity),
        )),
        Line::from(""),
        Line::from("[Enter] Close"),
    ]);
    let widget = Paragraph::new(text)
        .block(block(&notice.title))
        .wrap(Wrap { trim: true });
    frame.render_widget(widget, area);
}

fn centered_rect(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}
