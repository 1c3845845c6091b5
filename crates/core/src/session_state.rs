use crate::{
    Command, Input,
    conversation::{Conversation, ConversationError},
    message::Message,
    report::FeedbackReport,
    speech::{CaptureError, CaptureId, NarrationId, SpeechAdapter, SpeechEvent},
    store::{InterviewStore, NewInterview},
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

const COMPLETION_BUFFER: usize = 8;

/// Lifecycle phase of an interview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Active,
    Ending,
    Feedback,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Active => "active",
            Phase::Ending => "ending",
            Phase::Feedback => "feedback",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    /// Reject answers once `question_limit` of them have been given, instead of
    /// trusting the interviewer to stop asking.
    pub enforce_question_limit: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {operation} while the session is {phase}")]
    Protocol {
        operation: &'static str,
        phase: Phase,
    },
    #[error("the interviewer has not answered the previous turn yet")]
    TurnInFlight,
    #[error("all {0} questions have already been answered")]
    QuestionLimitReached(u32),
    #[error("invalid session setup: {0}")]
    InvalidSetup(&'static str),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

// Results of spawned backend calls, tagged with the generation they were issued under.
enum Completion {
    Started {
        generation: u64,
        result: Result<Message, ConversationError>,
    },
    Replied {
        generation: u64,
        result: Result<Message, ConversationError>,
    },
    Analyzed {
        generation: u64,
        result: Result<FeedbackReport, ConversationError>,
    },
}

impl Completion {
    fn generation(&self) -> u64 {
        match self {
            Completion::Started { generation, .. }
            | Completion::Replied { generation, .. }
            | Completion::Analyzed { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Start,
    Turn,
    Analysis,
}

struct Pending {
    kind: InFlight,
    task: AbortHandle,
}

/// The interview state machine.
///
/// All session state is mutated through `&mut self` by a single driver, either by
/// calling the operations and [`InterviewSession::process_next`] directly or by
/// handing the session to [`InterviewSession::run`]. Backend calls and speech run in
/// spawned tasks and report back through channels.
pub struct InterviewSession {
    conversation: Arc<Conversation>,
    speech: SpeechAdapter,
    speech_events: mpsc::Receiver<SpeechEvent>,
    store: Option<Arc<dyn InterviewStore>>,
    commands: Option<mpsc::Sender<Command>>,
    config: SessionConfig,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
    generation: u64,
    pending: Option<Pending>,

    phase: Phase,
    role: String,
    question_limit: u32,
    history: Vec<Message>,
    report: Option<FeedbackReport>,
    partial_transcript: String,
    last_error: Option<String>,
    voice_enabled: bool,
    listening: Option<CaptureId>,
    speaking: Option<NarrationId>,
}

impl InterviewSession {
    pub fn new(
        conversation: Arc<Conversation>,
        speech: SpeechAdapter,
        speech_events: mpsc::Receiver<SpeechEvent>,
        config: SessionConfig,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_BUFFER);
        let voice_enabled = speech.is_supported();
        Self {
            conversation,
            speech,
            speech_events,
            store: None,
            commands: None,
            config,
            completions_tx,
            completions_rx,
            generation: 0,
            pending: None,
            phase: Phase::Idle,
            role: String::new(),
            question_limit: 0,
            history: Vec::new(),
            report: None,
            partial_transcript: String::new(),
            last_error: None,
            voice_enabled,
            listening: None,
            speaking: None,
        }
    }

    /// Saves every completed interview to `store`.
    pub fn with_store(mut self, store: Arc<dyn InterviewStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Reports state changes as [`Command`]s on `commands`.
    pub fn with_commands(mut self, commands: mpsc::Sender<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn question_limit(&self) -> u32 {
        self.question_limit
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn report(&self) -> Option<&FeedbackReport> {
        self.report.as_ref()
    }

    pub fn partial_transcript(&self) -> &str {
        &self.partial_transcript
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled
    }

    pub fn is_listening(&self) -> bool {
        self.listening.is_some()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    /// Whether a backend call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Answers the interviewer replied to. A turn whose reply failed is not counted.
    pub fn answers_given(&self) -> u32 {
        self.history
            .windows(2)
            .filter(|pair| pair[0].is_user() && !pair[1].is_user() && !pair[1].error)
            .count() as u32
    }

    /// Starts an interview for `role`. Allowed from `Idle`, or from `Failed` to retry.
    pub fn submit_role(&mut self, role: &str, question_limit: u32) -> Result<(), SessionError> {
        if !matches!(self.phase, Phase::Idle | Phase::Failed) {
            return Err(self.protocol_error("start an interview"));
        }
        let role = role.trim();
        if role.is_empty() {
            return Err(SessionError::InvalidSetup("the role must not be empty"));
        }
        if question_limit == 0 {
            return Err(SessionError::InvalidSetup("at least one question is required"));
        }

        self.role = role.to_string();
        self.question_limit = question_limit;
        self.history.clear();
        self.report = None;
        self.last_error = None;
        self.set_phase(Phase::Starting);
        tracing::info!(
            "Starting interview for '{}' ({} questions)",
            self.role,
            question_limit
        );

        let conversation = self.conversation.clone();
        let generation = self.generation;
        let role = self.role.clone();
        self.spawn(InFlight::Start, async move {
            let result = conversation.begin_session(&role, question_limit).await;
            Completion::Started { generation, result }
        });
        Ok(())
    }

    /// Submits one answer. Whitespace-only input is ignored.
    pub fn submit_turn(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("Ignoring blank submission");
            return Ok(());
        }
        if self.phase != Phase::Active {
            return Err(self.protocol_error("submit an answer"));
        }
        if self.pending.is_some() {
            return Err(SessionError::TurnInFlight);
        }
        if self.config.enforce_question_limit && self.answers_given() >= self.question_limit {
            return Err(SessionError::QuestionLimitReached(self.question_limit));
        }

        if self.listening.is_some() {
            self.speech.cancel_capture();
            self.capture_closed();
        }
        self.last_error = None;
        self.append(Message::user(text));

        let conversation = self.conversation.clone();
        let generation = self.generation;
        let text = text.to_string();
        self.spawn(InFlight::Turn, async move {
            let result = conversation.send_turn(&text).await;
            Completion::Replied { generation, result }
        });
        Ok(())
    }

    /// Ends the interview and requests the feedback report.
    pub fn end_session(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Active {
            return Err(self.protocol_error("end the interview"));
        }
        if self.pending.is_some() {
            return Err(SessionError::TurnInFlight);
        }

        self.speech.cancel_all();
        self.capture_closed();
        self.narration_closed();
        self.last_error = None;
        self.set_phase(Phase::Ending);
        tracing::info!(
            "Ending interview after {} answers; requesting analysis",
            self.answers_given()
        );

        let conversation = self.conversation.clone();
        let generation = self.generation;
        let history = self.history.clone();
        self.spawn(InFlight::Analysis, async move {
            let result = conversation.request_analysis(&history).await;
            Completion::Analyzed { generation, result }
        });
        Ok(())
    }

    /// Abandons whatever is happening and returns to `Idle`.
    ///
    /// Results of work started before the reset are discarded when they arrive.
    pub fn reset_session(&mut self) {
        self.generation += 1;
        if let Some(pending) = self.pending.take() {
            tracing::debug!("Abandoning {:?} request", pending.kind);
            pending.task.abort();
        }
        self.speech.cancel_all();
        self.conversation.reset();

        self.role.clear();
        self.question_limit = 0;
        self.history.clear();
        self.report = None;
        self.last_error = None;
        self.capture_closed();
        self.narration_closed();
        self.set_phase(Phase::Idle);
        tracing::info!("Session reset");
    }

    /// Starts listening for an answer, or stops the capture already running.
    pub fn toggle_capture(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Active {
            return Err(self.protocol_error("use the microphone"));
        }
        if !self.voice_enabled {
            return Err(CaptureError::Unsupported.into());
        }

        if self.listening.is_some() {
            tracing::debug!("Stopping speech capture");
            self.speech.stop_capture();
            return Ok(());
        }

        // Don't record the interviewer's own voice.
        self.speech.cancel_narration();
        self.narration_closed();

        let handle = self.speech.transcribe()?;
        self.listening = Some(handle.id());
        self.partial_transcript.clear();
        self.emit(Command::Listening(true));
        Ok(())
    }

    pub fn handle_input(&mut self, input: Input) {
        let result = match input {
            Input::SubmitRole {
                role,
                question_limit,
            } => self.submit_role(&role, question_limit),
            Input::SubmitTurn(text) => self.submit_turn(&text),
            Input::EndSession => self.end_session(),
            Input::ResetSession => {
                self.reset_session();
                Ok(())
            }
            Input::ToggleCapture => self.toggle_capture(),
        };

        if let Err(e) = result {
            tracing::warn!("Rejected input: {}", e);
            self.notice(e.to_string());
        }
    }

    /// Waits for the next background result and applies it.
    pub async fn process_next(&mut self) {
        tokio::select! {
            Some(completion) = self.completions_rx.recv() => self.handle_completion(completion),
            Some(event) = self.speech_events.recv() => self.handle_speech_event(event),
        }
    }

    /// Drives the session from `inputs` until that channel closes.
    pub async fn run(mut self, mut inputs: mpsc::Receiver<Input>) {
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
                Some(completion) = self.completions_rx.recv() => self.handle_completion(completion),
                Some(event) = self.speech_events.recv() => self.handle_speech_event(event),
            }
        }
        self.speech.cancel_all();
        tracing::info!("Session loop finished");
    }

    fn handle_completion(&mut self, completion: Completion) {
        if completion.generation() != self.generation {
            tracing::debug!(
                "Discarding completion from generation {} (current {})",
                completion.generation(),
                self.generation
            );
            return;
        }
        self.pending = None;

        match completion {
            Completion::Started { result, .. } => match result {
                Ok(opening) => {
                    self.set_phase(Phase::Active);
                    self.append(opening.clone());
                    self.narrate(&opening.text);
                }
                Err(e) => {
                    tracing::error!("Failed to start interview: {}", e);
                    self.fail_recoverably(e.to_string());
                    self.set_phase(Phase::Failed);
                }
            },
            Completion::Replied { result, .. } => {
                let reply = result.unwrap_or_else(|e| {
                    tracing::warn!("Turn could not be submitted: {}", e);
                    Message::failure(e)
                });
                if reply.error {
                    self.fail_recoverably(reply.text.clone());
                    self.append(reply);
                } else {
                    self.append(reply.clone());
                    self.narrate(&reply.text);
                }
            }
            Completion::Analyzed { result, .. } => match result {
                Ok(report) => {
                    tracing::info!("Interview scored {}/100", report.overall_score);
                    self.persist(&report);
                    self.report = Some(report.clone());
                    self.set_phase(Phase::Feedback);
                    self.emit(Command::ReportReady(report));
                }
                Err(e) => {
                    tracing::error!("Analysis failed: {}", e);
                    self.fail_recoverably(format!("Could not generate feedback: {e}"));
                    self.set_phase(Phase::Active);
                }
            },
        }
    }

    fn handle_speech_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Partial { id, text } if self.listening == Some(id) => {
                self.partial_transcript = text.clone();
                self.emit(Command::PartialTranscript(text));
            }
            SpeechEvent::Final { id, text } if self.listening == Some(id) => {
                self.partial_transcript.clear();
                if let Err(e) = self.submit_turn(&text) {
                    tracing::warn!("Dropping spoken answer: {}", e);
                    self.fail_recoverably(e.to_string());
                }
            }
            SpeechEvent::CaptureFailed { id, error } if self.listening == Some(id) => {
                if error.disables_voice() {
                    tracing::warn!("Disabling voice input: {}", error);
                    self.voice_enabled = false;
                }
                self.fail_recoverably(error.to_string());
            }
            SpeechEvent::CaptureEnded { id } if self.listening == Some(id) => {
                self.capture_closed();
            }
            SpeechEvent::NarrationStarted { id } if self.speaking == Some(id) => {
                self.emit(Command::Speaking(true));
            }
            SpeechEvent::NarrationEnded { id } if self.speaking == Some(id) => {
                self.narration_closed();
            }
            stale => tracing::debug!("Ignoring stale speech event: {:?}", stale),
        }
    }

    fn spawn<F>(&mut self, kind: InFlight, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions_tx.clone();
        let task = tokio::spawn(async move {
            let completion = work.await;
            if completions.send(completion).await.is_err() {
                tracing::debug!("Session dropped before completion could be delivered");
            }
        });
        self.pending = Some(Pending {
            kind,
            task: task.abort_handle(),
        });
        tracing::debug!("{:?} request in flight", kind);
    }

    fn persist(&self, report: &FeedbackReport) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let record = NewInterview::new(&self.role, report, &self.history);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            match store.create(&record).await {
                Ok(created) => {
                    tracing::info!("Interview saved with id {}", created.id);
                    if let Some(commands) = commands {
                        let notice =
                            Command::Notice(format!("Interview saved (id {}).", created.id));
                        if let Err(e) = commands.try_send(notice) {
                            tracing::warn!("Failed to send command: {}", e);
                        }
                    }
                }
                // Saving is best-effort; the report is already on screen.
                Err(e) => tracing::error!("Failed to save interview: {}", e),
            }
        });
    }

    fn narrate(&mut self, text: &str) {
        self.speaking = self.speech.narrate(text);
    }

    fn append(&mut self, message: Message) {
        self.history.push(message.clone());
        self.emit(Command::MessageAppended(message));
    }

    fn capture_closed(&mut self) {
        self.partial_transcript.clear();
        if self.listening.take().is_some() {
            self.emit(Command::Listening(false));
        }
    }

    fn narration_closed(&mut self) {
        if self.speaking.take().is_some() {
            self.emit(Command::Speaking(false));
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!("Phase {} -> {}", self.phase, phase);
            self.phase = phase;
            self.emit(Command::PhaseChanged(phase));
        }
    }

    fn fail_recoverably(&mut self, message: String) {
        self.last_error = Some(message.clone());
        self.notice(message);
    }

    fn notice(&self, message: String) {
        self.emit(Command::Notice(message));
    }

    fn protocol_error(&self, operation: &'static str) -> SessionError {
        SessionError::Protocol {
            operation,
            phase: self.phase,
        }
    }

    fn emit(&self, command: Command) {
        if let Some(commands) = &self.commands {
            if let Err(e) = commands.try_send(command) {
                tracing::warn!("Failed to send command: {}", e);
            }
        }
    }
}
