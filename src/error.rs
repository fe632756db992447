//! Error taxonomy for the chat synchronization core

use thiserror::Error;

/// Failure of a single chat operation.
///
/// Every failure is terminal for the operation that produced it; nothing is
/// retried. Read paths log and drop these, send paths hand them to the user.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Request or connection rejected, timed out, or dropped.
    #[error("network failure: {0}")]
    Network(String),

    /// The server answered, but not with what we expected.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// A send was attempted with no live channel.
    #[error("chat channel is not connected")]
    ChannelUnavailable,
}

impl ChatError {
    /// Message shown to the user in a blocking notice.
    pub fn user_notice(&self) -> String {
        match self {
            ChatError::Network(_) => "Error sending message. Check your connection.".to_string(),
            ChatError::Protocol(detail) => format!("Message could not be sent ({}).", detail),
            ChatError::ChannelUnavailable => {
                "Chat is not connected. Reload and try again.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChatError::Protocol(format!("undecodable response: {}", e))
        } else {
            ChatError::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_notice_carries_server_detail() {
        let err = ChatError::Protocol("permission_denied".to_string());
        assert!(err.user_notice().contains("permission_denied"));
    }

    #[test]
    fn test_channel_unavailable_display() {
        assert_eq!(
            ChatError::ChannelUnavailable.to_string(),
            "chat channel is not connected"
        );
    }
}
