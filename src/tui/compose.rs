//! Compose box: single-line text input with a send indicator.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
    Frame,
};

use crate::error::ChatError;
use crate::sync::SendOutcome;

/// State for the compose box.
#[derive(Default)]
pub struct ComposeState {
    /// Current input text.
    pub input: String,
    /// Cursor position (character offset into `input`).
    pub cursor_pos: usize,
    /// A send is in flight; submit is disabled until it settles.
    pub busy: bool,
}

impl ComposeState {
    /// Insert a character at the current cursor position.
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = self.char_to_byte(self.cursor_pos);
        self.input.insert(byte_pos, c);
        self.cursor_pos += 1;
    }

    /// Delete the character before the cursor (backspace).
    pub fn backspace(&mut self) {
        if self.cursor_pos > 0 {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let prev_byte_pos = self.char_to_byte(self.cursor_pos - 1);
            self.input.drain(prev_byte_pos..byte_pos);
            self.cursor_pos -= 1;
        }
    }

    /// Delete the character at the cursor (delete key).
    pub fn delete(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor_pos < char_count {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let next_byte_pos = self.char_to_byte(self.cursor_pos + 1);
            self.input.drain(byte_pos..next_byte_pos);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor_pos = self.cursor_pos.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor_pos < self.input.chars().count() {
            self.cursor_pos += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor_pos = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_pos = self.input.chars().count();
    }

    /// Clear all input text (Ctrl+U).
    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
    }

    /// Replace the input with a canned reply. Does not send.
    pub fn fill(&mut self, text: &str) {
        self.input = text.to_string();
        self.move_end();
    }

    /// Start a send: returns the trimmed text and marks the box busy.
    ///
    /// Returns None while another send is in flight or when the input is
    /// blank. The input itself is kept until the send settles.
    pub fn begin_submit(&mut self) -> Option<String> {
        if self.busy {
            return None;
        }
        let text = self.input.trim();
        if text.is_empty() {
            return None;
        }
        let text = text.to_string();
        self.busy = true;
        Some(text)
    }

    /// Settle a send: delivered clears the input, a failure leaves it for retry.
    pub fn finish_submit(&mut self, result: &Result<SendOutcome, ChatError>) {
        self.busy = false;
        if let Ok(SendOutcome::Delivered { .. }) = result {
            self.clear();
        }
    }

    /// Convert a char-based cursor position to a byte offset.
    fn char_to_byte(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}

/// Height of the compose box: border + input + border.
pub const COMPOSE_HEIGHT: u16 = 3;

const SEND_LABEL: &str = " Send > ";
const BUSY_LABEL: &str = "  ...   ";

/// Render the compose box into the given area.
///
/// Uses `Frame` directly so we can both write to the buffer and set cursor.
pub fn render(area: Rect, frame: &mut Frame, state: &ComposeState, focused: bool) {
    let border_style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border_style);

    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let button_w = SEND_LABEL.chars().count() as u16;
    let input_w = inner.width.saturating_sub(button_w);
    let input_area = Rect::new(inner.x, inner.y, input_w, 1);
    let button_area = Rect::new(inner.x + input_w, inner.y, inner.width - input_w, 1);

    let cursor = if focused && !state.busy {
        let display = compose_display_text(&state.input, state.cursor_pos, input_w as usize);
        Some((input_area.x + 1 + display.cursor_offset as u16, input_area.y))
    } else {
        None
    };

    render_input(input_area, frame.buffer_mut(), state);
    render_button(button_area, frame.buffer_mut(), state);

    if let Some(position) = cursor {
        frame.set_cursor_position(position);
    }
}

fn render_button(area: Rect, buf: &mut Buffer, state: &ComposeState) {
    let (label, style) = if state.busy {
        (BUSY_LABEL, Style::default().fg(Color::DarkGray))
    } else if state.input.trim().is_empty() {
        (SEND_LABEL, Style::default().fg(Color::DarkGray))
    } else {
        (
            SEND_LABEL,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )
    };
    Paragraph::new(Line::from(Span::styled(label, style))).render(area, buf);
}

/// Render the input line (with placeholder or text).
fn render_input(area: Rect, buf: &mut Buffer, state: &ComposeState) {
    let w = area.width as usize;

    if state.input.is_empty() {
        let placeholder: String = " Type a message...".chars().take(w).collect();
        let line = Line::from(Span::styled(
            placeholder,
            Style::default().fg(Color::DarkGray),
        ));
        Paragraph::new(line).render(area, buf);
    } else {
        let display = compose_display_text(&state.input, state.cursor_pos, w);
        let style = if state.busy {
            Style::default().fg(Color::Gray)
        } else {
            Style::default().fg(Color::White)
        };
        let line = Line::from(Span::styled(format!(" {}", display.visible), style));
        Paragraph::new(line).render(area, buf);
    }
}

/// What to display and where the cursor is.
struct DisplayText {
    visible: String,
    /// Cursor offset within `visible`, in columns.
    cursor_offset: usize,
}

/// Scroll the input horizontally so the cursor stays visible.
fn compose_display_text(input: &str, cursor_pos: usize, width: usize) -> DisplayText {
    let chars: Vec<char> = input.chars().collect();
    // One column of left margin.
    let avail = width.saturating_sub(1);
    if avail == 0 {
        return DisplayText {
            visible: String::new(),
            cursor_offset: 0,
        };
    }

    let cursor = cursor_pos.min(chars.len());
    let start = if cursor < avail { 0 } else { cursor - avail + 1 };
    let end = (start + avail).min(chars.len());

    DisplayText {
        visible: chars[start..end].iter().collect(),
        cursor_offset: cursor - start,
    }
}
