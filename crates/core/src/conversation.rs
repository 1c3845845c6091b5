use crate::message::{Message, Role};
use crate::report::{FeedbackReport, NO_ANSWERS_SUMMARY};
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default upper bound on a single backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Reply length cap during the interview, to keep narration short.
pub const DEFAULT_MAX_REPLY_TOKENS: u32 = 150;

const INTERVIEWER_TEMPLATE: &str = r#"
You are an expert interviewer conducting a job interview.
Your goal is to assess the candidate's suitability for the role of: {ROLE}.
You should:
1. Ask relevant, challenging, but fair questions.
2. Ask one question at a time.
3. Listen to the user's response and ask follow-up questions if the answer is vague or interesting.
4. Maintain a professional but encouraging tone.
5. If the user asks for feedback during the interview, politely say you will provide it at the end.
6. Keep your responses concise (under 50 words) to facilitate a natural voice conversation, unless you are explaining a complex concept.
7. You must ask exactly {LIMIT} questions in total.
8. Keep track of the question count.
9. After the user answers the {LIMIT}th question, thank them and say "Thank you for your time. The interview is now concluded."
10. Do not ask any more questions after the limit is reached.

Start by introducing yourself and asking the first question.
"#;

const ANALYSIS_TEMPLATE: &str = r#"
Analyze the following interview transcript and provide detailed feedback.

Return the response in strict JSON format with the following schema:
{
  "overallScore": number (0-100),
  "summary": "string (brief summary of performance)",
  "skills": [
    { "name": "Communication", "score": number (0-100) },
    { "name": "Technical Knowledge", "score": number (0-100) },
    { "name": "Problem Solving", "score": number (0-100) },
    { "name": "Professionalism", "score": number (0-100) }
  ],
  "keyHighlights": ["string", "string", "string"],
  "detailedFeedback": [
    { "category": "Strengths", "points": ["string", "string"] },
    { "category": "Areas for Improvement", "points": ["string", "string"] }
  ]
}

Do not include any markdown formatting (like ```json). Just return the raw JSON string.

Transcript:
{TRANSCRIPT}
"#;

/// Prompt templates used by [`Conversation`].
///
/// `interviewer` may reference `{ROLE}` and `{LIMIT}`; `analysis` must reference
/// `{TRANSCRIPT}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub interviewer: String,
    pub analysis: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            interviewer: INTERVIEWER_TEMPLATE.to_string(),
            analysis: ANALYSIS_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn interviewer_instruction(&self, role: &str, question_limit: u32) -> String {
        self.interviewer
            .replace("{ROLE}", role)
            .replace("{LIMIT}", &question_limit.to_string())
    }

    pub fn analysis_prompt(&self, transcript_json: &str) -> String {
        self.analysis.replace("{TRANSCRIPT}", transcript_json)
    }
}

/// The candidate's side of the seeded exchange that opens every interview.
pub fn ready_line(role: &str) -> String {
    format!("I am ready for my interview for the {role} position. Please start.")
}

/// The interviewer's opening message, asked without a backend round trip.
pub fn opening_line(role: &str) -> String {
    format!(
        "Hello! I'm your interviewer today. I'll be asking you a series of questions to assess your fit for the {role} role. Let's get started. Tell me a little bit about yourself and why you're interested in this position."
    )
}

/// A single stateless generation request.
///
/// `contents` is the whole exchange to replay, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Message>,
    pub max_output_tokens: Option<u32>,
}

/// A language-model backend able to answer one generation request.
///
/// Implementations only move text; the interview protocol, history bookkeeping and
/// failure handling live in [`Conversation`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn generate(&self, request: &ChatRequest) -> Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("the language-model backend is not configured: {0}")]
    Initialization(String),
    #[error("no interview session has been started")]
    SessionNotStarted,
    #[error("the interviewer could not be reached: {0}")]
    Transport(String),
    #[error("the interviewer did not answer within {0:?}")]
    Timeout(Duration),
    #[error("failed to encode the transcript: {0}")]
    Encoding(#[from] serde_json::Error),
}

struct ChatContext {
    epoch: u64,
    instruction: String,
    contents: Vec<Message>,
}

#[derive(Default)]
struct ChatState {
    epoch: u64,
    context: Option<ChatContext>,
}

/// Manages the one ongoing exchange with the language-model backend.
///
/// The conversation replays its own chat context on every turn. A reply is only
/// committed to that context if no `begin_session` or `reset` happened while the
/// request was in flight.
pub struct Conversation {
    backend: Option<Arc<dyn ChatBackend>>,
    prompts: PromptTemplates,
    timeout: Duration,
    state: Mutex<ChatState>,
}

impl Conversation {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self::with_backend(Some(backend))
    }

    /// A conversation with no backend; every session start fails with
    /// [`ConversationError::Initialization`].
    pub fn disconnected() -> Self {
        Self::with_backend(None)
    }

    fn with_backend(backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self {
            backend,
            prompts: PromptTemplates::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            state: Mutex::new(ChatState::default()),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Starts a new exchange for `role`, replacing any previous one.
    pub async fn begin_session(
        &self,
        role: &str,
        question_limit: u32,
    ) -> Result<Message, ConversationError> {
        self.backend()?;

        let instruction = self.prompts.interviewer_instruction(role, question_limit);
        let opening = Message::assistant(opening_line(role));

        let mut state = self.state();
        state.epoch += 1;
        state.context = Some(ChatContext {
            epoch: state.epoch,
            instruction,
            contents: vec![Message::user(ready_line(role)), opening.clone()],
        });
        tracing::info!(
            "Interview exchange started for role '{}' with {} questions",
            role,
            question_limit
        );

        Ok(opening)
    }

    /// Submits one answer and returns the interviewer's next message.
    ///
    /// Backend failures do not surface as errors: the returned message is flagged
    /// with `error` and describes what went wrong.
    pub async fn send_turn(&self, user_text: &str) -> Result<Message, ConversationError> {
        let backend = self.backend()?;

        let (epoch, request) = {
            let state = self.state();
            let context = state
                .context
                .as_ref()
                .ok_or(ConversationError::SessionNotStarted)?;
            let mut contents = context.contents.clone();
            contents.push(Message::user(user_text));
            let request = ChatRequest {
                system_instruction: Some(context.instruction.clone()),
                contents,
                max_output_tokens: Some(DEFAULT_MAX_REPLY_TOKENS),
            };
            (context.epoch, request)
        };

        let reply = match self.call(&backend, &request).await {
            Ok(text) if !text.trim().is_empty() => Message::assistant(text.trim()),
            Ok(_) => {
                tracing::warn!("Interviewer returned an empty reply");
                return Ok(Message::failure("the interviewer returned an empty reply"));
            }
            Err(e) => {
                tracing::warn!("Turn submission failed: {}", e);
                return Ok(Message::failure(e));
            }
        };

        let mut state = self.state();
        match state.context.as_mut() {
            Some(context) if context.epoch == epoch => {
                context.contents.push(Message::user(user_text));
                context.contents.push(reply.clone());
            }
            _ => {
                tracing::debug!("Exchange was replaced while a reply was pending; not recording it")
            }
        }

        Ok(reply)
    }

    /// Asks the backend to grade the transcript.
    ///
    /// A transcript without any answers short-circuits to an empty report. Output
    /// that can't be parsed yields [`FeedbackReport::fallback`]; only transport
    /// failures are returned as errors.
    pub async fn request_analysis(
        &self,
        history: &[Message],
    ) -> Result<FeedbackReport, ConversationError> {
        if !history.iter().any(|m| m.role == Role::User) {
            tracing::info!("No answers in transcript; skipping analysis");
            return Ok(FeedbackReport::empty(NO_ANSWERS_SUMMARY));
        }

        let backend = self.backend()?;
        let transcript = serde_json::to_string(history)?;
        let request = ChatRequest {
            system_instruction: None,
            contents: vec![Message::user(self.prompts.analysis_prompt(&transcript))],
            max_output_tokens: None,
        };

        tracing::info!("Requesting analysis of {} messages", history.len());
        let raw = self.call(&backend, &request).await?;
        Ok(FeedbackReport::from_model_output(&raw))
    }

    /// Drops the current exchange. Replies still in flight will not be recorded.
    pub fn reset(&self) {
        let mut state = self.state();
        state.epoch += 1;
        state.context = None;
    }

    async fn call(
        &self,
        backend: &Arc<dyn ChatBackend>,
        request: &ChatRequest,
    ) -> Result<String, ConversationError> {
        match tokio::time::timeout(self.timeout, backend.generate(request)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ConversationError::Transport(format!("{e:#}"))),
            Err(_) => Err(ConversationError::Timeout(self.timeout)),
        }
    }

    fn backend(&self) -> Result<Arc<dyn ChatBackend>, ConversationError> {
        self.backend.clone().ok_or_else(|| {
            ConversationError::Initialization("no API key or endpoint was provided".to_string())
        })
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
