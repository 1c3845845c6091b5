use anyhow::{Context, Result};
use async_trait::async_trait;
use gemini_chat::types::{Content, GenerateContentRequest, GenerationConfig};
use gemini_chat::{Client, Config};
use interview_core::conversation::{ChatBackend, ChatRequest};
use interview_core::message::{Message, Role};
use secrecy::SecretString;
use std::time::Duration;

/// An adapter that implements the core `ChatBackend` trait for the `gemini_chat::Client`.
pub struct GeminiBackend {
    client: Client,
}

impl GeminiBackend {
    pub fn new(
        api_key: SecretString,
        model: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = Config::builder()
            .with_api_key(api_key)
            .with_model(model)
            .with_timeout(timeout);
        if let Some(base_url) = base_url {
            builder = builder.with_base_url(base_url);
        }
        let client = Client::new(builder.build()).context("Failed to create GeminiBackend")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    async fn generate(&self, request: &ChatRequest) -> Result<String> {
        self.client.generate_text(&to_gemini_request(request)).await
    }
}

/// Maps a core chat request onto the Gemini wire types.
pub fn to_gemini_request(request: &ChatRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: request
            .system_instruction
            .as_deref()
            .map(Content::system),
        contents: request.contents.iter().map(to_content).collect(),
        generation_config: request.max_output_tokens.map(|max| GenerationConfig {
            max_output_tokens: Some(max),
            temperature: None,
        }),
    }
}

fn to_content(message: &Message) -> Content {
    match message.role {
        Role::User => Content::user(message.text.as_str()),
        Role::Assistant => Content::model(message.text.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_and_limits_are_mapped() {
        // --- Arrange ---
        let request = ChatRequest {
            system_instruction: Some("Interview for Nurse".to_string()),
            contents: vec![
                Message::user("I am ready."),
                Message::assistant("Tell me about yourself."),
                Message::user("I have 10 years on the ward."),
            ],
            max_output_tokens: Some(150),
        };

        // --- Act ---
        let mapped = to_gemini_request(&request);

        // --- Assert ---
        let system = mapped.system_instruction.unwrap();
        assert_eq!(system.role, None);
        assert_eq!(system.parts[0].text.as_deref(), Some("Interview for Nurse"));
        let roles: Vec<_> = mapped
            .contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(mapped.generation_config.unwrap().max_output_tokens, Some(150));
    }

    #[test]
    fn test_analysis_request_has_no_instruction_or_cap() {
        let request = ChatRequest {
            system_instruction: None,
            contents: vec![Message::user("Analyze this.")],
            max_output_tokens: None,
        };

        let mapped = to_gemini_request(&request);
        assert!(mapped.system_instruction.is_none());
        assert!(mapped.generation_config.is_none());
        assert_eq!(mapped.contents.len(), 1);
    }
}
