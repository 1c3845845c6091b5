pub mod conversation;
pub mod message;
pub mod report;
pub mod session_state;
pub mod speech;
pub mod store;

use message::Message;
use report::FeedbackReport;
use session_state::Phase;

/// Represents commands that the core logic (`InterviewSession`) issues to the runtime.
///
/// This enum is the primary API for decoupling the session's decision-making
/// from the front end's rendering of it.
#[derive(Debug, Clone)]
pub enum Command {
    PhaseChanged(Phase),
    /// A message was appended to the transcript.
    MessageAppended(Message),
    /// Interim recognition text for the answer being spoken.
    PartialTranscript(String),
    Speaking(bool),
    Listening(bool),
    ReportReady(FeedbackReport),
    /// A user-facing status or error line.
    Notice(String),
}

/// Inputs accepted by `InterviewSession::run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    SubmitRole { role: String, question_limit: u32 },
    SubmitTurn(String),
    EndSession,
    ResetSession,
    ToggleCapture,
}
