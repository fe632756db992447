//! Projection of the conversation cache into a display list
//!
//! Message text, sender names and timestamps all come from other users or
//! the server and are escaped for whichever document they end up in.

use super::cache::ConversationCache;

/// Shown when the conversation has no messages.
pub const EMPTY_PLACEHOLDER: &str = "No messages yet. Say hello!";

/// One displayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: u64,
    pub sender: String,
    pub created_at: String,
    pub body: String,
    pub from_admin: bool,
}

/// Rendered conversation, in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub entries: Vec<Entry>,
}

/// Build the view for the current cache contents.
pub fn render(cache: &ConversationCache) -> View {
    View {
        entries: cache
            .get()
            .iter()
            .map(|m| Entry {
                id: m.id,
                sender: m.sender.clone(),
                created_at: m.created_at.clone(),
                body: m.text.clone(),
                from_admin: m.is_admin,
            })
            .collect(),
    }
}

impl View {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest id shown, if any.
    pub fn last_id(&self) -> Option<u64> {
        self.entries.last().map(|e| e.id)
    }

    /// HTML fragment as the storefront widget lays it out.
    pub fn to_html(&self) -> String {
        if self.entries.is_empty() {
            return format!("<div class=\"chat-empty\">{}</div>\n", escape_html(EMPTY_PLACEHOLDER));
        }

        let mut out = String::new();
        for entry in &self.entries {
            let class = if entry.from_admin { "from-admin" } else { "from-user" };
            out.push_str(&format!(
                "<div class=\"chat-message {}\">\
                 <div class=\"chat-message-meta\">\
                 <span class=\"chat-sender\">{}</span>\
                 <span class=\"chat-time\">{}</span>\
                 </div>\
                 <div class=\"chat-message-text\">{}</div>\
                 </div>\n",
                class,
                escape_html(&entry.sender),
                escape_html(&entry.created_at),
                escape_html(&entry.body),
            ));
        }
        out
    }

    /// Plain text lines for a terminal.
    pub fn to_text_lines(&self) -> Vec<String> {
        if self.entries.is_empty() {
            return vec![EMPTY_PLACEHOLDER.to_string()];
        }
        self.entries.iter().map(Entry::to_text_line).collect()
    }
}

impl Entry {
    pub fn to_text_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            sanitize_terminal(&self.created_at),
            sanitize_terminal(&self.sender),
            sanitize_terminal(&self.body)
        )
    }
}

/// HTML-escape text for insertion as element content or attribute value.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Neutralise control characters so text cannot drive the terminal.
///
/// Newlines and tabs survive; everything else in the C0/C1 ranges, ESC
/// included, is shown as U+FFFD.
pub fn sanitize_terminal(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\n' | '\t' => ch,
            c if c.is_control() => '\u{FFFD}',
            c => c,
        })
        .collect()
}
