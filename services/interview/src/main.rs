use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interview_core::conversation::Conversation;
use interview_core::session_state::{InterviewSession, Phase, SessionConfig};
use interview_core::speech::{Recognizer, SpeechAdapter, Synthesizer, VoiceSettings};
use interview_core::store::{HttpInterviewStore, InterviewStore};
use interview_core::{Command, Input};
use interview_service::config::{CHANNEL_CAPACITY, Config, PROMPTS_DIR};
use interview_service::console::{self, LineAction};
use interview_service::gemini_adapter::GeminiBackend;
use interview_service::speech_command::{CommandRecognizer, CommandSynthesizer};
use interview_service::{prompt_loader, render};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Practice job interviews with an AI interviewer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interview in the terminal (the default)
    Start {
        /// The role to interview for; asked interactively when omitted
        #[arg(long)]
        role: Option<String>,
        /// Number of questions the interviewer asks
        #[arg(long)]
        questions: Option<u32>,
        /// Don't save the result to the interview API
        #[arg(long)]
        no_save: bool,
    },
    /// List saved interviews, newest first
    History,
    /// Show a saved interview with its report and transcript
    Show { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so they don't interleave with the interview on stdout.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting interview service...");

    // --- 3. Parse Command-Line Arguments ---
    let cli = Cli::parse();
    let store = HttpInterviewStore::new(config.api_url.clone());

    match cli.command.unwrap_or(Commands::Start {
        role: None,
        questions: None,
        no_save: false,
    }) {
        Commands::Start {
            role,
            questions,
            no_save,
        } => {
            let store: Option<Arc<dyn InterviewStore>> = (!no_save).then(|| Arc::new(store) as _);
            run_interview(&config, role, questions, store).await
        }
        Commands::History => show_history(&store).await,
        Commands::Show { id } => show_interview(&store, id).await,
    }
}

async fn run_interview(
    config: &Config,
    role: Option<String>,
    questions: Option<u32>,
    store: Option<Arc<dyn InterviewStore>>,
) -> Result<()> {
    let question_limit = questions.unwrap_or(config.question_limit).max(1);

    // --- 4. Load Prompts ---
    let prompts =
        prompt_loader::load_templates(Path::new(PROMPTS_DIR)).context("Failed to load prompts")?;

    // --- 5. Initialize the Conversation Backend ---
    let conversation = match &config.gemini_api_key {
        Some(api_key) => {
            let backend = GeminiBackend::new(
                api_key.clone(),
                &config.gemini_model,
                config.gemini_base_url.as_deref(),
                config.request_timeout,
            )?;
            Conversation::new(Arc::new(backend))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY is not set; interviews will fail to start");
            Conversation::disconnected()
        }
    }
    .with_prompts(prompts)
    .with_timeout(config.request_timeout);

    // --- 6. Speech Engines ---
    let recognizer: Option<Arc<dyn Recognizer>> = match &config.stt_command {
        Some(line) => Some(Arc::new(CommandRecognizer::from_command_line(line)?)),
        None => None,
    };
    let synthesizer: Option<Arc<dyn Synthesizer>> = config
        .tts_command
        .as_ref()
        .map(|program| Arc::new(CommandSynthesizer::spawn(program.as_str())) as _);
    let mut settings = VoiceSettings::default();
    if let Some(voice) = &config.tts_voice {
        settings.preferred_voice = voice.clone();
    }
    let (speech, speech_events) = SpeechAdapter::new(recognizer, synthesizer, settings);
    if !speech.is_supported() {
        tracing::info!("Voice mode is off; set both STT_COMMAND and TTS_COMMAND to enable it");
        if speech.can_narrate() {
            tracing::info!("Interviewer messages will still be read aloud");
        }
    }

    // --- 7. Session Task ---
    let (input_tx, input_rx) = mpsc::channel::<Input>(CHANNEL_CAPACITY);
    // Create the command channel to decouple core logic from the console.
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(CHANNEL_CAPACITY);

    let mut session = InterviewSession::new(
        Arc::new(conversation),
        speech,
        speech_events,
        SessionConfig {
            enforce_question_limit: config.enforce_question_limit,
        },
    )
    .with_commands(command_tx);
    if let Some(store) = store {
        session = session.with_store(store);
    }
    let session_handle = tokio::spawn(session.run(input_rx));

    // --- 8. Console Loop ---
    let mut phase = Phase::Idle;
    match role {
        Some(role) => {
            input_tx
                .send(Input::SubmitRole {
                    role,
                    question_limit,
                })
                .await
                .context("Session stopped unexpectedly")?;
        }
        None => println!("What role are you interviewing for?"),
    }

    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                match console::parse_line(&line, phase, question_limit) {
                    LineAction::Send(input) => {
                        if input_tx.send(input).await.is_err() {
                            tracing::error!("Session task is gone; exiting");
                            break;
                        }
                    }
                    LineAction::Quit => break,
                    LineAction::Help => println!("{}", console::HELP),
                    LineAction::Hint(hint) => println!("{hint}"),
                    LineAction::Ignore => {}
                }
            }
            Some(command) = command_rx.recv() => {
                if let Command::PhaseChanged(next) = &command {
                    phase = *next;
                }
                if let Some(text) = console::describe(&command) {
                    println!("{text}");
                }
                if matches!(command, Command::ReportReady(_)) {
                    println!("Type /reset for a new interview or /quit to leave.");
                }
            }
        }
    }

    drop(input_tx);
    session_handle
        .await
        .context("Session task panicked")?;
    tracing::info!("Interview service stopped");
    Ok(())
}

// Reads stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

async fn show_history(store: &HttpInterviewStore) -> Result<()> {
    let interviews = store
        .list()
        .await
        .context("Failed to load interview history")?;
    if interviews.is_empty() {
        println!("No interviews saved yet.");
    }
    for interview in &interviews {
        println!("{}", render::format_summary(interview));
    }
    Ok(())
}

async fn show_interview(store: &HttpInterviewStore, id: i64) -> Result<()> {
    let record = store
        .get(id)
        .await
        .with_context(|| format!("Failed to load interview {id}"))?;
    println!("{}", render::format_record(&record));
    Ok(())
}
