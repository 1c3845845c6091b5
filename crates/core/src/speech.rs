//! Speech input and output behind two small engine traits.
//!
//! [`SpeechAdapter`] owns at most one capture and one narration at a time and reports
//! everything that happens to them as [`SpeechEvent`]s on a single channel. Each event
//! carries the id of the capture or narration it belongs to, so a consumer can drop
//! events from work it has already cancelled.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 64;
const RESULT_BUFFER: usize = 16;
/// How long a narration waits for the engine to publish its voice list.
const VOICE_LIST_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
    pub voice: Option<Voice>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
    /// Substring matched against voice names before falling back to `lang`.
    pub preferred_voice: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            lang: "en-US".to_string(),
            rate: 1.0,
            pitch: 1.0,
            preferred_voice: "Google US English".to_string(),
        }
    }
}

/// A result produced by a recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Partial(String),
    Final(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("no speech was detected")]
    NoSpeech,
    #[error("microphone access was denied")]
    NotAllowed,
    #[error("no microphone is available")]
    AudioCapture,
    #[error("speech recognition is not supported in this environment")]
    Unsupported,
    #[error("speech recognition failed: {0}")]
    Other(String),
}

impl CaptureError {
    /// Whether voice input should stay off for the rest of the session.
    pub fn disables_voice(&self) -> bool {
        matches!(
            self,
            CaptureError::NotAllowed | CaptureError::AudioCapture | CaptureError::Unsupported
        )
    }
}

/// A speech-to-text engine.
///
/// `recognize` captures a single utterance. It streams results into `results` and
/// returns once the engine is done, or soon after `stop` turns `true`.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(
        &self,
        lang: &str,
        stop: watch::Receiver<bool>,
        results: mpsc::Sender<Recognition>,
    ) -> Result<(), CaptureError>;
}

/// A text-to-speech engine.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// The installed voices, or `None` while the engine is still loading them.
    fn voices(&self) -> Option<Vec<Voice>>;

    /// Resolves once the voice list has changed.
    async fn voices_changed(&self);

    /// Speaks the utterance, resolving when playback has finished.
    async fn speak(&self, utterance: Utterance) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NarrationId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Partial { id: CaptureId, text: String },
    Final { id: CaptureId, text: String },
    CaptureFailed { id: CaptureId, error: CaptureError },
    CaptureEnded { id: CaptureId },
    NarrationStarted { id: NarrationId },
    NarrationEnded { id: NarrationId },
}

/// Handle to a running capture.
pub struct TranscriptionHandle {
    id: CaptureId,
    stop: Arc<watch::Sender<bool>>,
}

impl TranscriptionHandle {
    pub fn id(&self) -> CaptureId {
        self.id
    }

    /// Asks the engine to finish the capture with whatever it has heard so far.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

struct ActiveCapture {
    id: CaptureId,
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

struct ActiveNarration {
    id: NarrationId,
    task: JoinHandle<()>,
}

pub struct SpeechAdapter {
    recognizer: Option<Arc<dyn Recognizer>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    settings: VoiceSettings,
    events: mpsc::Sender<SpeechEvent>,
    next_id: u64,
    capture: Option<ActiveCapture>,
    narration: Option<ActiveNarration>,
}

impl SpeechAdapter {
    /// Creates the adapter and the receiving end of its event channel.
    ///
    /// Either engine may be absent, in which case the matching half of the adapter
    /// reports itself unsupported.
    pub fn new(
        recognizer: Option<Arc<dyn Recognizer>>,
        synthesizer: Option<Arc<dyn Synthesizer>>,
        settings: VoiceSettings,
    ) -> (Self, mpsc::Receiver<SpeechEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let adapter = Self {
            recognizer,
            synthesizer,
            settings,
            events,
            next_id: 0,
            capture: None,
            narration: None,
        };
        (adapter, events_rx)
    }

    /// An adapter with no engines, for text-only sessions.
    pub fn silent() -> (Self, mpsc::Receiver<SpeechEvent>) {
        Self::new(None, None, VoiceSettings::default())
    }

    /// Whether both capture and narration are available. Voice controls are only
    /// offered when this holds.
    pub fn is_supported(&self) -> bool {
        self.recognizer.is_some() && self.can_narrate()
    }

    pub fn can_narrate(&self) -> bool {
        self.synthesizer.is_some()
    }

    pub fn active_capture(&self) -> Option<CaptureId> {
        self.capture
            .as_ref()
            .filter(|capture| !capture.task.is_finished())
            .map(|capture| capture.id)
    }

    /// Starts capturing one utterance, replacing any capture already running.
    ///
    /// At most one [`SpeechEvent::Final`] is reported per capture, and every capture
    /// ends with a [`SpeechEvent::CaptureEnded`] unless it is cancelled first.
    pub fn transcribe(&mut self) -> Result<TranscriptionHandle, CaptureError> {
        let recognizer = self.recognizer.clone().ok_or(CaptureError::Unsupported)?;
        self.cancel_capture();

        let id = CaptureId(self.next_id());
        let (stop, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop);
        let lang = self.settings.lang.clone();
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let (results, mut results_rx) = mpsc::channel(RESULT_BUFFER);
            let recognize = recognizer.recognize(&lang, stop_rx, results);
            let forward = async {
                let mut finalized = false;
                while let Some(result) = results_rx.recv().await {
                    if finalized {
                        tracing::debug!("Dropping recognition result after final: {:?}", result);
                        continue;
                    }
                    let event = match result {
                        Recognition::Partial(text) => SpeechEvent::Partial { id, text },
                        Recognition::Final(text) => {
                            finalized = true;
                            SpeechEvent::Final { id, text }
                        }
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                finalized
            };

            let (outcome, finalized) = tokio::join!(recognize, forward);
            match outcome {
                Err(error) if !finalized => {
                    tracing::warn!("Speech capture failed: {}", error);
                    let _ = events.send(SpeechEvent::CaptureFailed { id, error }).await;
                }
                Err(error) => {
                    tracing::debug!("Ignoring capture error after final result: {}", error)
                }
                Ok(()) => {}
            }
            let _ = events.send(SpeechEvent::CaptureEnded { id }).await;
        });

        self.capture = Some(ActiveCapture {
            id,
            stop: stop.clone(),
            task,
        });
        tracing::debug!("Speech capture {:?} started", id);
        Ok(TranscriptionHandle { id, stop })
    }

    /// Asks the running capture, if any, to finish.
    pub fn stop_capture(&self) {
        if let Some(capture) = &self.capture {
            let _ = capture.stop.send(true);
        }
    }

    /// Aborts the running capture without reporting anything further for it.
    pub fn cancel_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.task.abort();
        }
    }

    /// Speaks `text`, interrupting any narration in progress.
    ///
    /// Returns `None` when there is no synthesizer or nothing to say.
    pub fn narrate(&mut self, text: &str) -> Option<NarrationId> {
        let synthesizer = self.synthesizer.clone()?;
        self.cancel_narration();
        if text.trim().is_empty() {
            return None;
        }

        let id = NarrationId(self.next_id());
        let settings = self.settings.clone();
        let events = self.events.clone();
        let text = text.to_string();

        let task = tokio::spawn(async move {
            let voice = match synthesizer.voices() {
                Some(voices) => select_voice(&voices, &settings),
                None => {
                    // The engine may still be loading; wait for its list once.
                    if tokio::time::timeout(VOICE_LIST_WAIT, synthesizer.voices_changed())
                        .await
                        .is_err()
                    {
                        tracing::debug!("Voice list not ready; using the engine default");
                    }
                    synthesizer
                        .voices()
                        .and_then(|voices| select_voice(&voices, &settings))
                }
            };

            let utterance = Utterance {
                text,
                lang: settings.lang.clone(),
                rate: settings.rate,
                pitch: settings.pitch,
                voice,
            };

            let _ = events.send(SpeechEvent::NarrationStarted { id }).await;
            if let Err(e) = synthesizer.speak(utterance).await {
                tracing::warn!("Narration failed: {:#}", e);
            }
            let _ = events.send(SpeechEvent::NarrationEnded { id }).await;
        });

        self.narration = Some(ActiveNarration { id, task });
        Some(id)
    }

    pub fn cancel_narration(&mut self) {
        if let Some(narration) = self.narration.take() {
            tracing::debug!("Cancelling narration {:?}", narration.id);
            narration.task.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel_capture();
        self.cancel_narration();
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Drop for SpeechAdapter {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Picks the preferred voice by name, falling back to the first voice in `lang`.
pub fn select_voice(voices: &[Voice], settings: &VoiceSettings) -> Option<Voice> {
    let preferred = (!settings.preferred_voice.is_empty())
        .then(|| {
            voices
                .iter()
                .find(|voice| voice.name.contains(settings.preferred_voice.as_str()))
        })
        .flatten();

    preferred
        .or_else(|| {
            voices
                .iter()
                .find(|voice| same_language(&voice.lang, &settings.lang))
        })
        .cloned()
}

fn same_language(a: &str, b: &str) -> bool {
    a.replace('_', "-").eq_ignore_ascii_case(&b.replace('_', "-"))
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Replays a fixed set of results for every capture.
    pub struct FakeRecognizer {
        pub results: Vec<Recognition>,
        pub outcome: Result<(), CaptureError>,
        /// Keep the capture open until it is stopped.
        pub hold_until_stopped: bool,
    }

    impl FakeRecognizer {
        pub fn saying(text: &str) -> Self {
            Self {
                results: vec![
                    Recognition::Partial(text.split_whitespace().next().unwrap_or_default().into()),
                    Recognition::Final(text.into()),
                ],
                outcome: Ok(()),
                hold_until_stopped: false,
            }
        }

        pub fn failing(error: CaptureError) -> Self {
            Self {
                results: Vec::new(),
                outcome: Err(error),
                hold_until_stopped: false,
            }
        }
    }

    #[async_trait]
    impl Recognizer for FakeRecognizer {
        async fn recognize(
            &self,
            _lang: &str,
            mut stop: watch::Receiver<bool>,
            results: mpsc::Sender<Recognition>,
        ) -> Result<(), CaptureError> {
            for result in &self.results {
                let _ = results.send(result.clone()).await;
            }
            if self.hold_until_stopped {
                let _ = stop.wait_for(|stopped| *stopped).await;
            }
            self.outcome.clone()
        }
    }

    pub struct FakeSynthesizer {
        pub voices: Mutex<Option<Vec<Voice>>>,
        pub changed: Notify,
        pub spoken: Mutex<Vec<Utterance>>,
        pub speak_for: Duration,
    }

    impl FakeSynthesizer {
        pub fn with_voices(voices: Option<Vec<Voice>>) -> Self {
            Self {
                voices: Mutex::new(voices),
                changed: Notify::new(),
                spoken: Mutex::new(Vec::new()),
                speak_for: Duration::ZERO,
            }
        }

        pub fn spoken_texts(&self) -> Vec<String> {
            self.spoken
                .lock()
                .unwrap()
                .iter()
                .map(|u| u.text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Synthesizer for FakeSynthesizer {
        fn voices(&self) -> Option<Vec<Voice>> {
            self.voices.lock().unwrap().clone()
        }

        async fn voices_changed(&self) {
            self.changed.notified().await;
        }

        async fn speak(&self, utterance: Utterance) -> anyhow::Result<()> {
            self.spoken.lock().unwrap().push(utterance);
            tokio::time::sleep(self.speak_for).await;
            Ok(())
        }
    }

    pub fn voice(name: &str, lang: &str) -> Voice {
        Voice {
            name: name.to_string(),
            lang: lang.to_string(),
        }
    }
}
