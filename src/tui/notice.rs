//! Blocking notice popup: send failures and bot hand-off.

use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

const POPUP_WIDTH: u16 = 56;
const POPUP_HEIGHT: u16 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Error,
    Info,
}

/// A message the user has to dismiss before doing anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }
}

pub fn render_notice(frame: &mut Frame, notice: &Notice) {
    let area = frame.area();
    let popup_w = POPUP_WIDTH.min(area.width.saturating_sub(2));
    let popup_h = POPUP_HEIGHT.min(area.height.saturating_sub(2));
    let popup_area = centered_rect(popup_w, popup_h, area);

    frame.render_widget(Clear, popup_area);

    let (title, color) = match notice.kind {
        NoticeKind::Error => (" ERROR ", Color::Red),
        NoticeKind::Info => (" NOTICE ", Color::Cyan),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(Span::styled(
            title,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))
        .title_bottom(Line::from(Span::styled(
            " Enter to close ",
            Style::default().fg(Color::Gray),
        )));

    let body = Paragraph::new(Line::from(notice.text.clone()))
        .block(block)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    frame.render_widget(body, popup_area);
}

/// A `width` x `height` rectangle centered in `area`.
fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_rect_fits_small_areas() {
        let area = Rect::new(0, 0, 20, 5);
        let popup = centered_rect(56, 7, area);
        assert_eq!(popup, Rect::new(0, 0, 20, 5));

        let popup = centered_rect(10, 3, Rect::new(0, 0, 30, 9));
        assert_eq!(popup, Rect::new(10, 3, 10, 3));
    }
}
