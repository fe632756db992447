//! Message-related models

use serde::{Deserialize, Serialize};

/// Chat message as delivered by both the retrieval endpoint and the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned, unique within a conversation.
    pub id: u64,
    /// Display label of the author.
    pub sender: String,
    /// Untrusted body text.
    pub text: String,
    /// Sent by support/admin rather than the customer.
    pub is_admin: bool,
    /// Server-formatted time, opaque to the client.
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<u64>,
}

/// Body of the per-conversation messages resource.
#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub messages: Option<Vec<Message>>,
}

/// Status reply shared by the send endpoint and channel acknowledgements.
#[derive(Debug, Default, Deserialize)]
pub struct StatusReply {
    pub status: Option<String>,
    pub error: Option<String>,
    /// Set by the bot endpoint when the question was forwarded to a human.
    #[serde(default)]
    pub handoff: bool,
}

impl StatusReply {
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("ok")
    }
}
