//! TUI application state and main event loop

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::DefaultTerminal;
use tokio::sync::mpsc;

use crate::api;
use crate::config::{Config, Role};
use crate::error::ChatError;
use crate::sync::{self, LinkStatus, SendOutcome, SessionHandle};

use super::compose::ComposeState;
use super::messages::MessagesState;
use super::notice::Notice;
use super::ui;

/// Lines moved per PageUp/PageDown.
const PAGE_LINES: usize = 10;

/// What the event loop should do after a key press.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Send(String),
    Reload,
    Quit,
}

/// Application state
pub struct App {
    pub should_exit: bool,
    /// Who we are, for the header.
    pub role_label: String,
    pub link: LinkStatus,
    pub messages: MessagesState,
    pub compose: ComposeState,
    /// Blocks all input except dismissal while shown.
    pub notice: Option<Notice>,
    pub quick_replies: Vec<String>,
}

impl App {
    pub fn new(role: Role, link: LinkStatus, quick_replies: Vec<String>) -> Self {
        let (role_label, header) = match role {
            Role::Customer => ("customer".to_string(), "Support".to_string()),
            Role::Admin { user_id } => ("admin".to_string(), format!("Customer #{}", user_id)),
        };
        Self {
            should_exit: false,
            role_label,
            link,
            messages: MessagesState::new(header),
            compose: ComposeState::default(),
            notice: None,
            quick_replies,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if self.notice.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                self.notice = None;
            }
            return Action::None;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);

        match key.code {
            KeyCode::Esc => Action::Quit,
            KeyCode::Char('c') if ctrl => Action::Quit,
            KeyCode::Char('r') if ctrl => Action::Reload,
            KeyCode::Char('u') if ctrl => {
                if !self.compose.busy {
                    self.compose.clear();
                }
                Action::None
            }
            KeyCode::Char(d @ '1'..='9') if alt => {
                let index = (d as usize) - ('1' as usize);
                if let Some(reply) = self.quick_replies.get(index) {
                    if !self.compose.busy {
                        self.compose.fill(reply);
                    }
                }
                Action::None
            }
            KeyCode::Enter => match self.compose.begin_submit() {
                Some(text) => Action::Send(text),
                None => Action::None,
            },
            KeyCode::Up => {
                self.messages.scroll_up(1);
                Action::None
            }
            KeyCode::Down => {
                self.messages.scroll_down(1);
                Action::None
            }
            KeyCode::PageUp => {
                self.messages.scroll_up(PAGE_LINES);
                Action::None
            }
            KeyCode::PageDown => {
                self.messages.scroll_down(PAGE_LINES);
                Action::None
            }
            KeyCode::End if ctrl => {
                self.messages.jump_to_latest();
                Action::None
            }
            _ if self.compose.busy => Action::None,
            KeyCode::Char(c) if !ctrl && !alt => {
                self.compose.insert_char(c);
                Action::None
            }
            KeyCode::Backspace => {
                self.compose.backspace();
                Action::None
            }
            KeyCode::Delete => {
                self.compose.delete();
                Action::None
            }
            KeyCode::Left => {
                self.compose.move_left();
                Action::None
            }
            KeyCode::Right => {
                self.compose.move_right();
                Action::None
            }
            KeyCode::Home => {
                self.compose.move_home();
                Action::None
            }
            KeyCode::End => {
                self.compose.move_end();
                Action::None
            }
            _ => Action::None,
        }
    }

    /// Apply the result of a send started with `Action::Send`.
    pub fn finish_send(&mut self, result: Result<SendOutcome, ChatError>) {
        self.compose.finish_submit(&result);
        self.notice = match &result {
            Ok(outcome) => api::outcome_notice(outcome).map(Notice::info),
            Err(e) => Some(Notice::error(e.user_notice())),
        };
    }

    pub fn render(&self, frame: &mut ratatui::Frame) {
        ui::render(frame, self);
    }
}

/// Run the TUI against a live chat session.
pub async fn run(config: &Config) -> Result<()> {
    let role = config.role()?;
    let transport = sync::build_transport(config)?;
    let (handle, task) = sync::start(transport, role);

    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, &handle, role, config.quick_replies.clone()).await;
    ratatui::restore();

    handle.shutdown();
    task.join().await;
    result
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    handle: &SessionHandle,
    role: Role,
    quick_replies: Vec<String>,
) -> Result<()> {
    let mut view_rx = handle.view();
    let mut link_rx = handle.link();
    let mut app = App::new(role, *link_rx.borrow_and_update(), quick_replies);
    app.messages.set_view(view_rx.borrow_and_update().clone());

    let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
    let mut events = EventStream::new();

    while !app.should_exit {
        terminal
            .draw(|frame| app.render(frame))
            .context("Failed to draw terminal")?;

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    match app.handle_key(key) {
                        Action::Send(text) => {
                            let handle = handle.clone();
                            let sent_tx = sent_tx.clone();
                            tokio::spawn(async move {
                                let _ = sent_tx.send(handle.send(&text).await);
                            });
                        }
                        Action::Reload => handle.reload(),
                        Action::Quit => app.should_exit = true,
                        Action::None => {}
                    }
                }
                // Resize and the rest just trigger a redraw.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Failed to read terminal event"),
                None => app.should_exit = true,
            },
            Ok(()) = view_rx.changed() => {
                app.messages.set_view(view_rx.borrow_and_update().clone());
            }
            Ok(()) = link_rx.changed() => {
                app.link = *link_rx.borrow_and_update();
            }
            Some(result) = sent_rx.recv() => app.finish_send(result),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn app() -> App {
        App::new(
            Role::Admin { user_id: 7 },
            LinkStatus::Connected,
            vec!["Thanks for waiting.".to_string(), "Your order has shipped.".to_string()],
        )
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_enter_sends_trimmed_text_once() {
        let mut app = app();
        type_text(&mut app, " hi ");
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Action::Send("hi".to_string()));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Action::None);

        // Typing is ignored while the send is in flight.
        type_text(&mut app, "x");
        assert_eq!(app.compose.input, " hi ");
    }

    #[test]
    fn test_quick_reply_fills_without_sending() {
        let mut app = app();
        let action = app.handle_key(KeyEvent::new(KeyCode::Char('2'), KeyModifiers::ALT));
        assert_eq!(action, Action::None);
        assert_eq!(app.compose.input, "Your order has shipped.");

        // Out of range does nothing.
        app.handle_key(KeyEvent::new(KeyCode::Char('9'), KeyModifiers::ALT));
        assert_eq!(app.compose.input, "Your order has shipped.");
    }

    #[test]
    fn test_failed_send_shows_blocking_notice() {
        let mut app = app();
        type_text(&mut app, "hello");
        app.handle_key(key(KeyCode::Enter));
        app.finish_send(Err(ChatError::Protocol("permission_denied".to_string())));

        let notice = app.notice.clone().unwrap();
        assert!(notice.text.contains("permission_denied"));
        assert_eq!(app.compose.input, "hello");

        // Keys other than dismissal are swallowed.
        assert_eq!(app.handle_key(key(KeyCode::Char('x'))), Action::None);
        assert!(app.notice.is_some());
        assert_eq!(app.compose.input, "hello");

        assert_eq!(app.handle_key(key(KeyCode::Esc)), Action::None);
        assert!(app.notice.is_none());
        assert_eq!(app.handle_key(key(KeyCode::Esc)), Action::Quit);
    }

    #[test]
    fn test_handoff_shows_info_notice() {
        let mut app = app();
        type_text(&mut app, "help");
        app.handle_key(key(KeyCode::Enter));
        app.finish_send(Ok(SendOutcome::Delivered { handoff: true }));

        assert_eq!(app.notice, Some(Notice::info(api::HANDOFF_NOTICE)));
        assert!(app.compose.input.is_empty());
    }

    #[test]
    fn test_ctrl_r_reloads() {
        let mut app = app();
        let action = app.handle_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL));
        assert_eq!(action, Action::Reload);
    }
}
