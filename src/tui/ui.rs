//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
    Frame,
};

use crate::sync::LinkStatus;

use super::app::App;
use super::compose;
use super::messages;
use super::notice;

const TITLE: &str = " Support Chat";

/// Returns status indicator symbol and color for the link state
fn status_indicator(link: LinkStatus) -> (&'static str, Color) {
    match link {
        LinkStatus::Connected | LinkStatus::Polling => ("*", Color::Green),
        LinkStatus::Connecting => ("~", Color::Yellow),
        LinkStatus::Disconnected | LinkStatus::Closed => ("o", Color::Red),
    }
}

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let replies_height = if app.quick_replies.is_empty() { 0 } else { 1 };

    let [header_area, messages_area, replies_area, compose_area, status_area] =
        Layout::vertical([
            Constraint::Length(1),
            Constraint::Fill(1),
            Constraint::Length(replies_height),
            Constraint::Length(compose::COMPOSE_HEIGHT),
            Constraint::Length(1),
        ])
        .areas(area);

    render_header(header_area, frame.buffer_mut(), app);
    messages::render(messages_area, frame.buffer_mut(), &app.messages);
    if replies_height > 0 {
        render_quick_replies(replies_area, frame.buffer_mut(), &app.quick_replies);
    }
    compose::render(compose_area, frame, &app.compose, app.notice.is_none());
    render_status(status_area, frame.buffer_mut(), app);

    // Notice goes on top of everything else.
    if let Some(ref n) = app.notice {
        notice::render_notice(frame, n);
    }
}

fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let (symbol, color) = status_indicator(app.link);
    let right = format!("{} {}  {} ", symbol, app.link.as_str(), app.role_label);
    let padding = (area.width as usize).saturating_sub(TITLE.len() + right.chars().count());

    let line = Line::from(vec![
        Span::styled(
            TITLE,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" ".repeat(padding)),
        Span::styled(format!("{} {}", symbol, app.link.as_str()), Style::default().fg(color)),
        Span::styled(format!("  {} ", app.role_label), Style::default().fg(Color::Cyan)),
    ]);

    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

fn render_quick_replies(area: Rect, buf: &mut Buffer, replies: &[String]) {
    let mut spans = Vec::new();
    for (i, reply) in replies.iter().take(9).enumerate() {
        spans.push(Span::styled(
            format!(" M-{} ", i + 1),
            Style::default().fg(Color::Yellow),
        ));
        let short: String = reply.chars().take(24).collect();
        spans.push(Span::styled(short, Style::default().fg(Color::Gray)));
    }
    Paragraph::new(Line::from(spans)).render(area, buf);
}

fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    let sep_style = Style::default().fg(Color::DarkGray);
    let hint_style = Style::default().fg(Color::Gray);

    let mut spans = Vec::new();
    if app.compose.busy {
        spans.push(Span::styled(" Sending... ", Style::default().fg(Color::Yellow)));
        spans.push(Span::styled("|", sep_style));
    }
    if !app.messages.is_following() {
        spans.push(Span::styled(" C-End: latest ", Style::default().fg(Color::Cyan)));
        spans.push(Span::styled("|", sep_style));
    }
    spans.extend([
        Span::styled(" Enter: send ", hint_style),
        Span::styled("|", sep_style),
        Span::styled(" PgUp/PgDn: scroll ", hint_style),
        Span::styled("|", sep_style),
        Span::styled(" C-r: reload ", hint_style),
        Span::styled("|", sep_style),
        Span::styled(" Esc: quit", hint_style),
    ]);

    Paragraph::new(Line::from(spans))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}
