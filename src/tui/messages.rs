//! Messages pane: the conversation as bordered cards, newest at the bottom.

use std::cell::Cell;

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

use crate::sync::render::{sanitize_terminal, Entry, EMPTY_PLACEHOLDER};
use crate::sync::View;

/// State for the messages pane.
pub struct MessagesState {
    /// Pane title (whose conversation this is).
    pub header: String,
    pub view: View,
    /// First visible line when not following.
    scroll_offset: usize,
    /// Stick to the newest message.
    follow: bool,
    /// Largest useful scroll offset seen by the last render.
    max_scroll: Cell<usize>,
}

impl MessagesState {
    pub fn new(header: String) -> Self {
        Self {
            header,
            view: View::default(),
            scroll_offset: 0,
            follow: true,
            max_scroll: Cell::new(0),
        }
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }

    pub fn is_following(&self) -> bool {
        self.follow
    }

    pub fn scroll_up(&mut self, lines: usize) {
        if self.follow {
            self.scroll_offset = self.max_scroll.get();
            self.follow = false;
        }
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    /// Scrolling back to the end resumes following.
    pub fn scroll_down(&mut self, lines: usize) {
        if self.follow {
            return;
        }
        self.scroll_offset += lines;
        if self.scroll_offset >= self.max_scroll.get() {
            self.follow = true;
        }
    }

    pub fn jump_to_latest(&mut self) {
        self.follow = true;
    }

    fn effective_scroll(&self, total_lines: usize, visible_height: usize) -> usize {
        let max_scroll = total_lines.saturating_sub(visible_height);
        self.max_scroll.set(max_scroll);
        if self.follow {
            max_scroll
        } else {
            self.scroll_offset.min(max_scroll)
        }
    }
}

/// Render the messages pane into the given area.
pub fn render(area: Rect, buf: &mut Buffer, state: &MessagesState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    // First line holds the conversation header.
    let header_area = Rect::new(inner.x, inner.y, inner.width, 1);
    render_header(header_area, buf, &state.header);

    let messages_area = Rect::new(
        inner.x,
        inner.y + 1,
        inner.width,
        inner.height.saturating_sub(1),
    );
    if messages_area.height == 0 {
        return;
    }

    if state.view.is_empty() {
        let line = Line::from(Span::styled(
            format!(" {}", EMPTY_PLACEHOLDER),
            Style::default().fg(Color::DarkGray),
        ));
        Paragraph::new(line).render(messages_area, buf);
        return;
    }

    let all_lines = build_message_lines(&state.view, messages_area.width as usize);
    let total_lines = all_lines.len();
    let visible_height = messages_area.height as usize;
    let scroll = state.effective_scroll(total_lines, visible_height);

    for (row, line) in all_lines.iter().skip(scroll).take(visible_height).enumerate() {
        let line_area = Rect::new(
            messages_area.x,
            messages_area.y + row as u16,
            messages_area.width,
            1,
        );
        Paragraph::new(line.clone()).render(line_area, buf);
    }

    if total_lines > visible_height {
        let indicator_x = messages_area.x + messages_area.width.saturating_sub(1);
        if scroll > 0 {
            let cell = &mut buf[(indicator_x, messages_area.y)];
            cell.set_char('^');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
        if scroll + visible_height < total_lines {
            let bottom_y = messages_area.y + messages_area.height.saturating_sub(1);
            let cell = &mut buf[(indicator_x, bottom_y)];
            cell.set_char('v');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
    }
}

fn render_header(area: Rect, buf: &mut Buffer, header: &str) {
    let line = Line::from(Span::styled(
        format!(" {} ", header),
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    ));
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Flatten the view into display lines.
fn build_message_lines(view: &View, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for entry in &view.entries {
        render_message_card(&mut lines, entry, width);
        lines.push(Line::from(""));
    }
    lines
}

/// One message as a bordered card. Staff messages are indented and tinted.
fn render_message_card(lines: &mut Vec<Line<'static>>, entry: &Entry, width: usize) {
    let indent = if entry.from_admin { 4 } else { 0 };
    let indent_str = " ".repeat(indent);
    let card_inner_width = width.saturating_sub(indent).saturating_sub(6);

    let border_style = if entry.from_admin {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::Gray)
    };
    let sender_style = Style::default()
        .fg(Color::White)
        .add_modifier(Modifier::BOLD);

    let sender = sanitize_terminal(&entry.sender).replace(['\n', '\t'], " ");
    let timestamp = sanitize_terminal(&entry.created_at).replace(['\n', '\t'], " ");
    let body = sanitize_terminal(&entry.body).replace('\t', "    ");

    if card_inner_width < 10 {
        // No room for a card: one clipped line.
        let indent = indent.min(width / 2);
        let room = width.saturating_sub(indent);
        let sender: String = sender.chars().take(room).collect();
        let rest = room.saturating_sub(sender.chars().count());
        let text: String = format!(": {}", body.replace('\n', " "))
            .chars()
            .take(rest)
            .collect();
        lines.push(Line::from(vec![
            Span::raw(" ".repeat(indent)),
            Span::styled(sender, sender_style),
            Span::styled(text, border_style),
        ]));
        return;
    }

    let rule = "-".repeat(card_inner_width + 2);
    lines.push(Line::from(Span::styled(
        format!("{}+{}+", indent_str, rule),
        border_style,
    )));

    let sender_pad = card_inner_width
        .saturating_sub(sender.chars().count())
        .saturating_sub(timestamp.chars().count());
    lines.push(Line::from(vec![
        Span::raw(indent_str.clone()),
        Span::styled("| ", border_style),
        Span::styled(sender, sender_style),
        Span::raw(" ".repeat(sender_pad)),
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::styled(" |", border_style),
    ]));

    for text in wrap_text(&body, card_inner_width) {
        let pad = card_inner_width.saturating_sub(text.chars().count());
        lines.push(Line::from(vec![
            Span::raw(indent_str.clone()),
            Span::styled("| ", border_style),
            Span::raw(format!("{}{}", text, " ".repeat(pad))),
            Span::styled(" |", border_style),
        ]));
    }

    lines.push(Line::from(Span::styled(
        format!("{}+{}+", indent_str, rule),
        border_style,
    )));
}

/// Word-wrap by line, hard-splitting words wider than `max_width`.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![];
    }
    let mut result = Vec::new();
    for line in text.lines() {
        if line.chars().count() <= max_width {
            result.push(line.to_string());
            continue;
        }

        let mut current = String::new();
        for word in line.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(max_width);
                result.push(word.into_iter().collect());
                word = rest;
            }
            let word: String = word.into_iter().collect();
            let current_len = current.chars().count();
            if current.is_empty() {
                current = word;
            } else if current_len + 1 + word.chars().count() <= max_width {
                current.push(' ');
                current.push_str(&word);
            } else {
                result.push(std::mem::replace(&mut current, word));
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}
