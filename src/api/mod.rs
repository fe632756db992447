//! Storefront chat API and one-shot commands

pub mod chat;
pub mod client;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::sync::{self, render, SendOutcome};

/// Shown after the bot forwards a question to staff.
pub const HANDOFF_NOTICE: &str = "Your question was forwarded to support.";

/// Load the conversation once and print it.
pub async fn read_messages(config: &Config, html: bool) -> Result<()> {
    let role = config.role()?;
    let client = client::ChatHttpClient::new(config)?;
    let endpoints = chat::Endpoints::for_role(role);

    let messages = chat::fetch_messages(&client, &endpoints)
        .await
        .context("Failed to load messages")?;

    let mut cache = sync::cache::ConversationCache::new();
    cache.replace(messages);
    let view = render::render(&cache);

    if html {
        print!("{}", view.to_html());
    } else {
        for line in view.to_text_lines() {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Send one message with the configured transport.
pub async fn send_message(config: &Config, text: &str) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        println!("Nothing to send.");
        return Ok(());
    }

    let transport = sync::build_transport(config)?;
    if let Err(e) = transport.open().await {
        tracing::warn!("Chat channel unavailable: {}", e);
    }
    let result = transport.send(text).await;
    transport.close().await;

    let delivered = result.map_err(|e| anyhow::anyhow!(e.user_notice()))?;
    println!("Message sent.");
    if delivered.handoff {
        println!("{}", HANDOFF_NOTICE);
    }
    Ok(())
}

/// Run a headless session and print messages as they appear.
pub async fn watch(config: &Config) -> Result<()> {
    let role = config.role()?;
    let transport = sync::build_transport(config)?;
    let (handle, task) = sync::start(transport, role);

    let mut view_rx = handle.view();
    let mut link_rx = handle.link();
    let mut printer = WatchPrinter::default();

    tracing::info!("Watching conversation, Ctrl+C to stop");
    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                for line in printer.lines(&view) {
                    println!("{}", line);
                }
            }
            changed = link_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *link_rx.borrow_and_update();
                tracing::info!("Link {}", status.as_str());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown();
    task.join().await;
    Ok(())
}

/// Tracks what `watch` has already printed.
#[derive(Default)]
struct WatchPrinter {
    last_printed: Option<u64>,
    announced_empty: bool,
}

impl WatchPrinter {
    /// Lines to print for a newly published view.
    fn lines(&mut self, view: &render::View) -> Vec<String> {
        if view.entries.is_empty() {
            if self.last_printed.is_none() && !self.announced_empty {
                self.announced_empty = true;
                return vec![render::EMPTY_PLACEHOLDER.to_string()];
            }
            return Vec::new();
        }

        let last_printed = self.last_printed;
        let lines = view
            .entries
            .iter()
            .filter(|entry| last_printed.map_or(true, |last| entry.id > last))
            .map(|entry| entry.to_text_line())
            .collect();
        if let Some(last) = view.last_id() {
            self.last_printed = Some(last_printed.map_or(last, |prev| prev.max(last)));
        }
        lines
    }
}

/// Describe a send result for the user, if anything needs saying.
pub fn outcome_notice(outcome: &SendOutcome) -> Option<&'static str> {
    match outcome {
        SendOutcome::Delivered { handoff: true } => Some(HANDOFF_NOTICE),
        _ => None,
    }
}
