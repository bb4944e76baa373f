// Internal message representation.
//
// These are the canonical types the whole relay operates on: the session
// store holds `Vec<Message>`, the turn controller appends to it, and the
// upstream client serializes it directly into the chat-completion request
// body (roles are lowercase on the wire).

use serde::{Deserialize, Serialize};

/// The role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
///
/// Messages are immutable once appended, with one exception: the streaming
/// turn appends an empty-content assistant placeholder whose content is
/// written exactly once on commit (or the message is removed on rollback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructs_with_role_and_content() {
        let msg = Message::new(Role::User, "Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
    }

    #[test]
    fn message_with_empty_content() {
        let msg = Message::new(Role::Assistant, "");
        assert_eq!(msg.content, "");
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = Message::new(Role::System, "You are helpful");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "You are helpful");
    }

    #[test]
    fn message_roundtrips_through_json() {
        let msg = Message::new(Role::Assistant, "Hi there");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
