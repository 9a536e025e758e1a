//! Per-session translation recognizer.
//!
//! The recognizer owns the audio ingress reader, the upstream connection,
//! and six typed event streams. `start_continuous` drives the configuration
//! handshake, then runs two tasks: an audio pump (ingress buffer → audio
//! envelopes) and a reader fanout (decoded upstream events → event streams).
//! A single `select` over stop, cancellation, and failure channels is the
//! termination point; all exits converge on one teardown sequence.
//!
//! State machine:
//!
//! ```text
//!   Idle ──start──▶ Connecting ──configSent──▶ Streaming ──stop/err/EOF──▶ Stopping ──▶ Closed
//!                        │                                                    ▲
//!                        └────connectFailure──────────────────────────────────┘
//! ```
//!
//! Ordering: events are signaled in receive order from the upstream reader;
//! exactly one `session_started` precedes every other event and exactly one
//! `session_stopped` is the last.

pub mod events;
pub mod result;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioReader;
use crate::error::{CancellationErrorCode, LingoError, LingoResult};
use crate::protocol_constants::{
    EMPTY_READ_BACKOFF_MS, RECOGNIZE_ONCE_TIMEOUT_SECS, RECOMMENDED_CHUNK_BYTES,
};
use crate::upstream::codec::{SpeechConfig, UpstreamEvent};
use crate::upstream::connection::{UpstreamConnection, UpstreamSettings};
use crate::utils::new_request_id;

use events::{EventStream, SessionEvent, SpeechActivity, SpeechActivityKind};
use result::{CancellationDetails, RecognitionResult, ResultReason};

/// Lifecycle states of a recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerState {
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Closed,
}

/// The six named event streams of a recognizer.
pub struct RecognizerEvents {
    pub session_started: EventStream<SessionEvent>,
    pub session_stopped: EventStream<SessionEvent>,
    pub recognizing: EventStream<RecognitionResult>,
    pub recognized: EventStream<RecognitionResult>,
    pub canceled: EventStream<CancellationDetails>,
    pub speech_detected: EventStream<SpeechActivity>,
}

impl RecognizerEvents {
    fn new() -> Self {
        Self {
            session_started: EventStream::new(),
            session_stopped: EventStream::new(),
            recognizing: EventStream::new(),
            recognized: EventStream::new(),
            canceled: EventStream::new(),
            speech_detected: EventStream::new(),
        }
    }

    /// Drops every registered callback on every stream.
    pub fn disconnect_all(&self) {
        self.session_started.disconnect_all();
        self.session_stopped.disconnect_all();
        self.recognizing.disconnect_all();
        self.recognized.disconnect_all();
        self.canceled.disconnect_all();
        self.speech_detected.disconnect_all();
    }

    /// Connects debug-level observers to every stream.
    ///
    /// Observers log events without consuming them and stay registered
    /// until [`RecognizerEvents::disconnect_all`].
    pub fn attach_debug_logging(&self, session_id: &str) {
        let id = session_id.to_string();
        self.session_started
            .connect(move |event| tracing::debug!(session = %id, ?event, "session_started"));
        let id = session_id.to_string();
        self.session_stopped
            .connect(move |event| tracing::debug!(session = %id, ?event, "session_stopped"));
        let id = session_id.to_string();
        self.recognizing.connect(move |result| {
            tracing::debug!(session = %id, segment = %result.segment_id, "recognizing")
        });
        let id = session_id.to_string();
        self.recognized.connect(move |result| {
            tracing::debug!(session = %id, segment = %result.segment_id, "recognized")
        });
        let id = session_id.to_string();
        self.canceled.connect(move |details| {
            tracing::debug!(session = %id, code = ?details.error_code, "canceled")
        });
        let id = session_id.to_string();
        self.speech_detected.connect(move |activity| {
            tracing::debug!(session = %id, kind = ?activity.kind, "speech_detected")
        });
    }
}

/// How the streaming worker was asked to terminate.
enum WorkerExit {
    /// Client requested stop, or the session context was cancelled.
    Requested,
    /// The audio source reached end of stream.
    AudioEnded,
    /// The upstream socket closed; `None` means a clean close.
    UpstreamClosed(Option<CancellationDetails>),
    /// A failure from the pump or the provider.
    Failed(CancellationDetails),
}

/// Per-session orchestrator for streaming translation.
pub struct TranslationRecognizer {
    session_id: String,
    config: SpeechConfig,
    settings: UpstreamSettings,
    events: RecognizerEvents,
    state: Mutex<RecognizerState>,
    /// Taken exactly once when a recognition mode starts.
    audio: Mutex<Option<AudioReader>>,
    stop_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    connection: Mutex<Option<Arc<UpstreamConnection>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TranslationRecognizer {
    /// Creates a recognizer in the `Idle` state.
    ///
    /// `cancel` is the per-session token; it must derive from a fresh root,
    /// not from the HTTP handler's context, so the session survives the
    /// upgrade handler returning.
    pub fn new(
        session_id: String,
        config: SpeechConfig,
        settings: UpstreamSettings,
        audio: AudioReader,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            session_id,
            config,
            settings,
            events: RecognizerEvents::new(),
            state: Mutex::new(RecognizerState::Idle),
            audio: Mutex::new(Some(audio)),
            stop_tx,
            cancel,
            connection: Mutex::new(None),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    /// The event streams of this recognizer.
    pub fn events(&self) -> &RecognizerEvents {
        &self.events
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecognizerState {
        *self.state.lock()
    }

    /// The session this recognizer belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Starts continuous recognition.
    ///
    /// Emits `session_started`, opens the upstream connection, writes the
    /// configuration envelope, and spawns the pump and fanout tasks. A
    /// connect or configuration failure signals `canceled` with the
    /// classified details, then `session_stopped`, and returns the error.
    pub async fn start_continuous(self: &Arc<Self>) -> LingoResult<()> {
        self.transition_to_connecting()?;
        self.events.session_started.signal(&SessionEvent {
            session_id: self.session_id.clone(),
        });

        let (connection, event_rx) = match UpstreamConnection::connect(&self.settings).await {
            Ok(pair) => pair,
            Err(e) => {
                let details = e.to_cancellation();
                self.fail_before_streaming(&details);
                return Err(LingoError::Upstream(details.error_details));
            }
        };

        let request_id = new_request_id();
        if let Err(e) = connection
            .send_speech_config(&self.config, &request_id)
            .await
        {
            connection.close().await;
            let details = e.to_cancellation();
            self.fail_before_streaming(&details);
            return Err(LingoError::Upstream(details.error_details));
        }

        let audio = self
            .audio
            .lock()
            .take()
            .ok_or_else(|| LingoError::Internal("audio source already consumed".into()))?;

        *self.connection.lock() = Some(Arc::clone(&connection));
        *self.state.lock() = RecognizerState::Streaming;
        log::info!("[Recognizer] Streaming started ({})", self.session_id);

        let worker = tokio::spawn(run_worker(
            Arc::clone(self),
            connection,
            event_rx,
            audio,
            request_id,
        ));
        *self.worker.lock().await = Some(worker);
        Ok(())
    }

    /// Single-shot recognition: forwards one audio chunk (up to 8 KiB) and
    /// awaits the first final result, with a 30 s overall timeout.
    pub async fn recognize_once(self: &Arc<Self>) -> LingoResult<RecognitionResult> {
        self.transition_to_connecting()?;
        self.events.session_started.signal(&SessionEvent {
            session_id: self.session_id.clone(),
        });

        let (connection, mut event_rx) = match UpstreamConnection::connect(&self.settings).await {
            Ok(pair) => pair,
            Err(e) => {
                let details = e.to_cancellation();
                self.fail_before_streaming(&details);
                return Err(LingoError::Upstream(details.error_details));
            }
        };

        let request_id = new_request_id();
        let outcome = self
            .recognize_once_inner(&connection, &mut event_rx, &request_id)
            .await;

        *self.state.lock() = RecognizerState::Stopping;
        connection.close().await;

        let outcome = match outcome {
            Ok(result) => Ok(result),
            Err(details) => {
                self.events.canceled.signal(&details);
                Err(LingoError::Upstream(details.error_details))
            }
        };
        self.finish();
        outcome
    }

    async fn recognize_once_inner(
        self: &Arc<Self>,
        connection: &Arc<UpstreamConnection>,
        event_rx: &mut mpsc::Receiver<UpstreamEvent>,
        request_id: &str,
    ) -> Result<RecognitionResult, CancellationDetails> {
        connection
            .send_speech_config(&self.config, request_id)
            .await
            .map_err(|e| e.to_cancellation())?;

        let mut audio = self.audio.lock().take().ok_or_else(|| {
            CancellationDetails::from_error(
                CancellationErrorCode::RuntimeError,
                "audio source already consumed",
            )
        })?;

        *self.state.lock() = RecognizerState::Streaming;

        let recognize = async {
            let mut buf = vec![0u8; RECOMMENDED_CHUNK_BYTES];
            let n = loop {
                match audio.read(&mut buf).await {
                    Ok(0) => {
                        tokio::time::sleep(Duration::from_millis(EMPTY_READ_BACKOFF_MS)).await
                    }
                    Ok(n) => break n,
                    Err(_) => return Err(CancellationDetails::end_of_stream()),
                }
            };
            connection
                .send_audio_chunk(request_id, &bytes::Bytes::copy_from_slice(&buf[..n]))
                .await
                .map_err(|e| e.to_cancellation())?;

            while let Some(event) = event_rx.recv().await {
                match event {
                    UpstreamEvent::Hypothesis(result) => {
                        self.events.recognizing.signal(&result);
                    }
                    UpstreamEvent::Phrase(result) if result.reason != ResultReason::Hypothesis => {
                        self.events.recognized.signal(&result);
                        return Ok(result);
                    }
                    UpstreamEvent::Phrase(result) => {
                        self.events.recognizing.signal(&result);
                    }
                    UpstreamEvent::ServiceError(details) => return Err(details),
                    UpstreamEvent::Disconnected(details) => {
                        return Err(details.unwrap_or_else(|| {
                            CancellationDetails::from_error(
                                CancellationErrorCode::ConnectionFailure,
                                "upstream closed before a result",
                            )
                        }))
                    }
                    UpstreamEvent::TurnStarted { .. }
                    | UpstreamEvent::TurnEnded
                    | UpstreamEvent::SpeechStartDetected { .. }
                    | UpstreamEvent::SpeechEndDetected { .. } => {}
                }
            }
            Err(CancellationDetails::from_error(
                CancellationErrorCode::ConnectionFailure,
                "upstream event channel closed",
            ))
        };

        tokio::time::timeout(Duration::from_secs(RECOGNIZE_ONCE_TIMEOUT_SECS), recognize)
            .await
            .map_err(|_| {
                CancellationDetails::from_error(
                    CancellationErrorCode::ServiceTimeout,
                    "recognition timed out after 30s",
                )
            })?
    }

    /// Requests a stop of continuous recognition. Idempotent; the audio pump
    /// observes the request on its next loop iteration.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Cancels the session context, closing the upstream connection via the
    /// worker's teardown path. Non-blocking; safe to call from the sweep.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stops recognition, waits for the worker, and disconnects all event
    /// streams. Idempotent and terminal.
    pub async fn close(self: &Arc<Self>) {
        self.stop();
        self.cancel.cancel();

        let worker = self.worker.lock().await.take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    log::error!(
                        "[Recognizer] Worker panicked during close ({})",
                        self.session_id
                    );
                }
            }
        } else {
            // Never started streaming: close any half-open connection and
            // settle the state machine directly.
            let connection = self.connection.lock().take();
            if let Some(connection) = connection {
                connection.close().await;
            }
            let mut state = self.state.lock();
            if *state != RecognizerState::Closed {
                *state = RecognizerState::Closed;
            }
        }
        self.events.disconnect_all();
    }

    fn transition_to_connecting(&self) -> LingoResult<()> {
        let mut state = self.state.lock();
        if *state != RecognizerState::Idle {
            return Err(LingoError::InvalidRequest(format!(
                "recognizer already started (state {:?})",
                *state
            )));
        }
        *state = RecognizerState::Connecting;
        Ok(())
    }

    /// Teardown for failures before the worker exists: signal `canceled`
    /// with the details, then `session_stopped`, and settle in `Closed`.
    fn fail_before_streaming(&self, details: &CancellationDetails) {
        log::warn!(
            "[Recognizer] Session {} failed before streaming: {}",
            self.session_id,
            details.error_details
        );
        self.events.canceled.signal(details);
        self.finish();
    }

    /// Signals `session_stopped` and transitions to `Closed`. Idempotent:
    /// the stop event fires exactly once per recognizer.
    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if *state == RecognizerState::Closed {
                return;
            }
            *state = RecognizerState::Closed;
        }
        self.events.session_stopped.signal(&SessionEvent {
            session_id: self.session_id.clone(),
        });
        log::info!("[Recognizer] Session {} closed", self.session_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Worker
// ─────────────────────────────────────────────────────────────────────────────

/// Joins the audio pump and the event fanout; the `select` below is the
/// single termination point for the streaming phase.
async fn run_worker(
    recognizer: Arc<TranslationRecognizer>,
    connection: Arc<UpstreamConnection>,
    event_rx: mpsc::Receiver<UpstreamEvent>,
    audio: AudioReader,
    request_id: String,
) {
    let (exit_tx, mut exit_rx) = mpsc::channel::<WorkerExit>(2);
    let pump_cancel = CancellationToken::new();

    let pump = tokio::spawn(pump_audio(
        Arc::clone(&connection),
        audio,
        request_id,
        pump_cancel.clone(),
        exit_tx.clone(),
    ));
    let fanout = tokio::spawn(fan_out_events(
        Arc::clone(&recognizer),
        event_rx,
        exit_tx,
    ));

    // A stop requested before this subscription counts as already seen by
    // the watch channel, so check the current value first.
    let mut stop_rx = recognizer.stop_tx.subscribe();
    let exit = if *stop_rx.borrow() {
        WorkerExit::Requested
    } else {
        tokio::select! {
            _ = stop_rx.changed() => WorkerExit::Requested,
            _ = recognizer.cancel.cancelled() => WorkerExit::Requested,
            exit = exit_rx.recv() => exit.unwrap_or(WorkerExit::Requested),
        }
    };

    *recognizer.state.lock() = RecognizerState::Stopping;
    connection.close().await;
    pump_cancel.cancel();

    let mut panicked = false;
    for handle in [pump, fanout] {
        if let Err(e) = handle.await {
            if e.is_panic() {
                log::error!(
                    "[Recognizer] Session task panicked ({})",
                    recognizer.session_id
                );
                panicked = true;
            }
        }
    }

    let canceled = if panicked {
        Some(CancellationDetails::from_error(
            CancellationErrorCode::RuntimeError,
            "internal session task panicked",
        ))
    } else {
        match exit {
            WorkerExit::Requested => None,
            WorkerExit::AudioEnded | WorkerExit::UpstreamClosed(None) => {
                Some(CancellationDetails::end_of_stream())
            }
            WorkerExit::UpstreamClosed(Some(details)) | WorkerExit::Failed(details) => {
                Some(details)
            }
        }
    };

    if let Some(details) = canceled {
        recognizer.events.canceled.signal(&details);
    }
    recognizer.finish();
}

/// Pumps chunks from the ingress buffer into audio envelopes.
///
/// A zero-byte chunk is not end of stream: the pump yields briefly and
/// retries, bounding CPU during client silence.
async fn pump_audio(
    connection: Arc<UpstreamConnection>,
    mut audio: AudioReader,
    request_id: String,
    cancel: CancellationToken,
    exit: mpsc::Sender<WorkerExit>,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = audio.next_chunk() => chunk,
        };

        match chunk {
            None => {
                let _ = exit.send(WorkerExit::AudioEnded).await;
                break;
            }
            Some(chunk) if chunk.is_empty() => {
                tokio::time::sleep(Duration::from_millis(EMPTY_READ_BACKOFF_MS)).await;
            }
            Some(chunk) => {
                if let Err(e) = connection.send_audio_chunk(&request_id, &chunk).await {
                    let _ = exit.send(WorkerExit::Failed(e.to_cancellation())).await;
                    break;
                }
            }
        }
    }
}

/// Fans decoded upstream events onto the recognizer's event streams, in
/// receive order, on this task.
///
/// `turn.end` implies the end of speech, but the provider usually announces
/// `speech.endDetected` first; the `end_signaled` flag keeps the
/// `speech_detected` stream from seeing both for one turn.
async fn fan_out_events(
    recognizer: Arc<TranslationRecognizer>,
    mut event_rx: mpsc::Receiver<UpstreamEvent>,
    exit: mpsc::Sender<WorkerExit>,
) {
    let events = &recognizer.events;
    let mut end_signaled = false;
    while let Some(event) = event_rx.recv().await {
        match event {
            UpstreamEvent::TurnStarted { request_id } => {
                log::debug!(
                    "[Recognizer] Turn started ({}, request {:?})",
                    recognizer.session_id,
                    request_id
                );
                end_signaled = false;
            }
            UpstreamEvent::SpeechStartDetected { offset_nanos } => {
                end_signaled = false;
                events.speech_detected.signal(&SpeechActivity {
                    kind: SpeechActivityKind::Start,
                    offset_nanos: Some(offset_nanos),
                });
            }
            UpstreamEvent::Hypothesis(result) => events.recognizing.signal(&result),
            UpstreamEvent::Phrase(result) => match result.reason {
                ResultReason::Hypothesis => events.recognizing.signal(&result),
                _ => events.recognized.signal(&result),
            },
            UpstreamEvent::SpeechEndDetected { offset_nanos } => {
                end_signaled = true;
                events.speech_detected.signal(&SpeechActivity {
                    kind: SpeechActivityKind::End,
                    offset_nanos: Some(offset_nanos),
                });
            }
            UpstreamEvent::TurnEnded => {
                if !end_signaled {
                    events.speech_detected.signal(&SpeechActivity {
                        kind: SpeechActivityKind::End,
                        offset_nanos: None,
                    });
                }
                end_signaled = false;
            }
            UpstreamEvent::ServiceError(details) => {
                let _ = exit.send(WorkerExit::Failed(details)).await;
                break;
            }
            UpstreamEvent::Disconnected(details) => {
                let _ = exit.send(WorkerExit::UpstreamClosed(details)).await;
                break;
            }
        }
    }
}
