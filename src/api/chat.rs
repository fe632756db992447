//! Storefront chat endpoints (retrieval and form-post send)
//!
//! Customers talk to the bot endpoint, which may hand the question off to a
//! human. Admins read and write one customer's thread.

use crate::config::Role;
use crate::error::ChatError;
use crate::models::{Message, MessagesResponse, StatusReply};

use super::client::ChatHttpClient;

/// Resource paths for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub messages: String,
    pub send: String,
}

impl Endpoints {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Customer => Self {
                messages: "/chat/messages/".to_string(),
                send: "/chat/bot/".to_string(),
            },
            Role::Admin { user_id } => Self {
                messages: format!("/admin-chat/{}/messages/", user_id),
                send: format!("/admin-chat/{}/send/", user_id),
            },
        }
    }
}

/// Result of an accepted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    /// The bot forwarded the question to support staff.
    pub handoff: bool,
}

/// Fetch the whole conversation.
pub async fn fetch_messages(
    client: &ChatHttpClient,
    endpoints: &Endpoints,
) -> Result<Vec<Message>, ChatError> {
    let body: MessagesResponse = client.get_json(&endpoints.messages).await?;
    body.messages
        .ok_or_else(|| ChatError::Protocol("response has no 'messages' field".to_string()))
}

/// Post one message as a form field.
pub async fn post_message(
    client: &ChatHttpClient,
    endpoints: &Endpoints,
    text: &str,
) -> Result<Delivered, ChatError> {
    let (status, reply): (reqwest::StatusCode, StatusReply) = client
        .post_form(&endpoints.send, &[("message", text)])
        .await?;
    interpret_send_reply(status.is_success(), &reply)
}

/// Judge a send reply: only a success status with `"status": "ok"` counts.
pub fn interpret_send_reply(http_ok: bool, reply: &StatusReply) -> Result<Delivered, ChatError> {
    if http_ok && reply.is_ok() {
        return Ok(Delivered {
            handoff: reply.handoff,
        });
    }
    let detail = reply
        .error
        .clone()
        .or_else(|| reply.status.clone())
        .unwrap_or_else(|| "unexpected response".to_string());
    Err(ChatError::Protocol(detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(json: &str) -> StatusReply {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_endpoints_per_role() {
        let customer = Endpoints::for_role(Role::Customer);
        assert_eq!(customer.messages, "/chat/messages/");
        assert_eq!(customer.send, "/chat/bot/");

        let admin = Endpoints::for_role(Role::Admin { user_id: 42 });
        assert_eq!(admin.messages, "/admin-chat/42/messages/");
        assert_eq!(admin.send, "/admin-chat/42/send/");
    }

    #[test]
    fn test_ok_reply_with_handoff() {
        let delivered = interpret_send_reply(true, &reply(r#"{"status":"ok","handoff":true}"#));
        assert_eq!(delivered.unwrap(), Delivered { handoff: true });
    }

    #[test]
    fn test_error_status_is_protocol_failure() {
        let err = interpret_send_reply(true, &reply(r#"{"status":"error"}"#)).unwrap_err();
        assert!(matches!(err, ChatError::Protocol(ref d) if d == "error"));
    }

    #[test]
    fn test_server_error_detail_wins() {
        let err = interpret_send_reply(
            false,
            &reply(r#"{"status":"error","error":"permission_denied"}"#),
        )
        .unwrap_err();
        assert!(matches!(err, ChatError::Protocol(ref d) if d == "permission_denied"));
    }

    #[test]
    fn test_ok_body_on_failed_http_status_is_rejected() {
        assert!(interpret_send_reply(false, &reply(r#"{"status":"ok"}"#)).is_err());
    }

    #[test]
    fn test_shapeless_reply_is_rejected() {
        let err = interpret_send_reply(true, &reply("{}")).unwrap_err();
        assert!(matches!(err, ChatError::Protocol(ref d) if d == "unexpected response"));
    }

    #[test]
    fn test_messages_payload_decodes() {
        let body: MessagesResponse = serde_json::from_str(
            r#"{"messages":[{"id":3,"sender":"admin","text":"hi","is_admin":true,"created_at":"10:02"}]}"#,
        )
        .unwrap();
        let messages = body.messages.unwrap();
        assert_eq!(messages[0].id, 3);
        assert!(messages[0].is_admin);
        assert_eq!(messages[0].sender_id, None);
    }
}
