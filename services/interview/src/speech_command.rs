//! Speech engines backed by external command-line programs.
//!
//! The synthesizer drives an `espeak-ng` compatible program. The recognizer runs any
//! program that prints one recognition result per line on stdout, where lines
//! starting with `~` are interim results and every other line is final.

use anyhow::{Context, Result};
use async_trait::async_trait;
use interview_core::speech::{CaptureError, Recognition, Recognizer, Synthesizer, Utterance, Voice};
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

const DEFAULT_WORDS_PER_MINUTE: f32 = 175.0;
const DEFAULT_PITCH: f32 = 50.0;

pub struct CommandSynthesizer {
    program: String,
    voices: watch::Receiver<Option<Vec<Voice>>>,
}

impl CommandSynthesizer {
    /// Creates the synthesizer and starts listing the program's voices in the background.
    pub fn spawn(program: impl Into<String>) -> Self {
        let program = program.into();
        let (voices_tx, voices) = watch::channel(None);

        let discover = program.clone();
        tokio::spawn(async move {
            let voices = match list_voices(&discover).await {
                Ok(voices) => {
                    tracing::info!("{} reported {} voices", discover, voices.len());
                    voices
                }
                Err(e) => {
                    tracing::warn!("Could not list voices of {}: {:#}", discover, e);
                    Vec::new()
                }
            };
            let _ = voices_tx.send(Some(voices));
        });

        Self { program, voices }
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    fn voices(&self) -> Option<Vec<Voice>> {
        self.voices.borrow().clone()
    }

    async fn voices_changed(&self) {
        let mut voices = self.voices.clone();
        let _ = voices.changed().await;
    }

    async fn speak(&self, utterance: Utterance) -> Result<()> {
        // Dropping the future (on interruption) kills the child.
        let status = Command::new(&self.program)
            .args(speak_args(&utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !status.success() {
            anyhow::bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

async fn list_voices(program: &str) -> Result<Vec<Voice>> {
    let output = Command::new(program)
        .arg("--voices")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to run {program} --voices"))?;
    Ok(parse_voice_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parses the table printed by `espeak-ng --voices`.
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [_priority, lang, _age_gender, name, ..] => Some(Voice {
                    name: name.to_string(),
                    lang: lang.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

pub fn speak_args(utterance: &Utterance) -> Vec<String> {
    let voice = utterance
        .voice
        .as_ref()
        .map_or(utterance.lang.as_str(), |voice| voice.name.as_str());
    let speed = (DEFAULT_WORDS_PER_MINUTE * utterance.rate).round().max(80.0);
    let pitch = (DEFAULT_PITCH * utterance.pitch).round().clamp(0.0, 99.0);
    vec![
        "-v".to_string(),
        voice.to_string(),
        "-s".to_string(),
        speed.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        utterance.text.clone(),
    ]
}

pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace-separated command line such as `vosk-listen --model small`.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().context("Speech recognition command is empty")?;
        Ok(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn recognize(
        &self,
        lang: &str,
        mut stop: watch::Receiver<bool>,
        results: mpsc::Sender<Recognition>,
    ) -> Result<(), CaptureError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("SPEECH_LANG", lang)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Other("recognizer has no stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut heard_final = false;
        let mut stopped = false;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let Some(result) = parse_recognition_line(&line) else {
                            continue;
                        };
                        heard_final = matches!(result, Recognition::Final(_));
                        if results.send(result).await.is_err() || heard_final {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return Err(CaptureError::Other(e.to_string())),
                },
                _ = async { stop.wait_for(|stop| *stop).await.map(|_| ()) } => {
                    stopped = true;
                    break;
                }
            }
        }

        if stopped || heard_final {
            let _ = child.kill().await;
            return Ok(());
        }

        let status = child
            .wait()
            .await
            .map_err(|e| CaptureError::Other(e.to_string()))?;
        if !status.success() {
            return Err(CaptureError::Other(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Err(CaptureError::NoSpeech)
    }
}

fn spawn_error(program: &str, error: io::Error) -> CaptureError {
    tracing::warn!("Failed to start {}: {}", program, error);
    match error.kind() {
        io::ErrorKind::NotFound => CaptureError::Unsupported,
        io::ErrorKind::PermissionDenied => CaptureError::NotAllowed,
        _ => CaptureError::Other(error.to_string()),
    }
}

pub fn parse_recognition_line(line: &str) -> Option<Recognition> {
    let line = line.trim();
    match line.strip_prefix('~') {
        Some(partial) => {
            let partial = partial.trim();
            (!partial.is_empty()).then(|| Recognition::Partial(partial.to_string()))
        }
        None => (!line.is_empty()).then(|| Recognition::Final(line.to_string())),
    }
}
