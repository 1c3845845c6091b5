use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Who produced a message in the interview transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    // Older transcripts were written with the backend's own naming.
    #[serde(alias = "model", alias = "ai")]
    Assistant,
}

/// One turn of the interview transcript.
///
/// Messages are only ever appended to a session's history; once created they are
/// never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Set when the message is a failure notice injected in place of a real reply.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            error: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            error: false,
        }
    }

    /// An assistant-side notice describing why no real reply is available.
    pub fn failure(reason: impl Display) -> Self {
        Self {
            role: Role::Assistant,
            text: format!("Error: {reason}"),
            error: true,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_flag_is_omitted_for_regular_messages() {
        let json = serde_json::to_string(&Message::user("Hello")).unwrap();
        assert_eq!(json, r#"{"role":"user","text":"Hello"}"#);

        let json = serde_json::to_string(&Message::failure("rate limited")).unwrap();
        assert_eq!(
            json,
            r#"{"role":"assistant","text":"Error: rate limited","error":true}"#
        );
    }

    #[test]
    fn test_legacy_role_names_are_accepted() {
        let transcript: Vec<Message> = serde_json::from_str(
            r#"[{"role":"user","text":"Hello"},{"role":"ai","text":"Hi"},{"role":"model","text":"Next?"}]"#,
        )
        .unwrap();

        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[2].role, Role::Assistant);
        assert!(transcript.iter().all(|m| !m.error));
    }
}
