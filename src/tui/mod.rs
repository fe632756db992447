//! Terminal chat widget using Ratatui.

mod app;
mod compose;
mod messages;
mod notice;
mod ui;

pub use app::run;
