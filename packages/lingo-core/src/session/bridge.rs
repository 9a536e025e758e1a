//! Client-facing WebSocket bridge.
//!
//! Owns one client connection end to end: reads the setup frame, constructs
//! the ingress buffer and recognizer, registers the session, wires
//! event-stream callbacks into outbound client frames, ingests inbound audio,
//! and performs guaranteed teardown.
//!
//! All server→client frames go through one outbound writer task per
//! connection, so client writes are serialized. The outbound channel is
//! unbounded: event callbacks are synchronous, and a bounded channel would
//! have to drop frames when a stalled client fills it — the client must
//! receive its one error frame even then. Event callbacks capture only the
//! outbound channel and the session's cancellation token, never the
//! recognizer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::{ingress_channel, AudioWriter};
use crate::error::{LingoError, LingoResult};
use crate::language::{normalize_source, normalize_target};
use crate::protocol_constants::ALLOWED_AUDIO_FORMATS;
use crate::recognizer::result::ResultReason;
use crate::recognizer::TranslationRecognizer;
use crate::session::{SessionRegistry, StreamingSession};
use crate::state::Config;
use crate::upstream::codec::SpeechConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// First client frame: session setup.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupRequest {
    #[serde(default)]
    source_language: String,
    #[serde(default)]
    target_language: String,
    #[serde(default)]
    audio_format: String,
}

/// Subsequent client text frames: control messages or the legacy base64
/// audio path for non-binary clients.
#[derive(Deserialize)]
#[serde(untagged)]
enum ClientText {
    Control {
        #[serde(rename = "type")]
        kind: String,
    },
    LegacyAudio {
        audio: LegacyAudioPayload,
    },
}

#[derive(Deserialize)]
struct LegacyAudioPayload {
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadyFrame<'a> {
    status: &'a str,
    session_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslationFrame {
    source_language: String,
    target_language: String,
    translated_text: String,
    original_text: String,
    is_final: bool,
    segment_id: String,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct InitResponseFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'static str,
}

fn to_message<T: Serialize>(value: &T) -> Option<Message> {
    serde_json::to_string(value)
        .ok()
        .map(|s| Message::Text(s.into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Guard (RAII cleanup)
// ─────────────────────────────────────────────────────────────────────────────

/// Ensures the registry entry is removed even if the handler exits early.
///
/// `SessionRegistry::remove` is idempotent, so the explicit ordered teardown
/// and this guard can both run.
struct SessionGuard {
    session_id: String,
    registry: Arc<SessionRegistry>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.session_id).is_some() {
            log::info!("[Bridge] Session cleanup: {}", self.session_id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validated session parameters from the setup frame.
#[derive(Debug)]
struct SessionParams {
    source_language: String,
    target_language: String,
    audio_format: String,
}

fn validate_setup(setup: &SetupRequest) -> LingoResult<SessionParams> {
    let source_language =
        normalize_source(&setup.source_language).map_err(LingoError::source_language)?;
    let target_language =
        normalize_target(&setup.target_language).map_err(LingoError::target_language)?;

    let audio_format = setup.audio_format.trim().to_ascii_lowercase();
    if !ALLOWED_AUDIO_FORMATS.contains(&audio_format.as_str()) {
        return Err(LingoError::UnsupportedAudioFormat(
            setup.audio_format.clone(),
        ));
    }

    Ok(SessionParams {
        source_language,
        target_language,
        audio_format,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one client connection, recovering panics at this boundary.
///
/// A panic anywhere in the session is logged with the session id and the
/// registry entry is torn down; the recognizer's own worker converts task
/// panics to `canceled{runtimeError}` before this outer net is reached.
pub async fn run_client_session(
    socket: WebSocket,
    session_id: String,
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
) {
    let handle = tokio::spawn(drive_client_session(
        socket,
        session_id.clone(),
        Arc::clone(&registry),
        config,
    ));

    if let Err(e) = handle.await {
        if e.is_panic() {
            log::error!("[Bridge] Session {} panicked; cleaning up", session_id);
            if let Some(session) = registry.remove(&session_id) {
                session.cancel.cancel();
                let recognizer = Arc::clone(&session.recognizer);
                tokio::spawn(async move { recognizer.close().await });
            }
        }
    }
}

async fn drive_client_session(
    socket: WebSocket,
    session_id: String,
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
) {
    let (sender, mut receiver) = socket.split();

    // Outbound writer task: the single serialization point for all
    // server→client frames. Closes the socket once the channel drains.
    // Unbounded so the synchronous event callbacks never drop a frame;
    // translated-text frames are low-rate and bounded by the provider.
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(write_outbound(sender, out_rx));

    // Exactly one JSON setup frame before anything else.
    let setup = match read_setup_frame(&mut receiver).await {
        Ok(setup) => setup,
        Err(message) => {
            send_error_and_close(&out_tx, &message);
            drop(out_tx);
            writer.await.ok();
            return;
        }
    };

    let params = match validate_setup(&setup) {
        Ok(params) => params,
        Err(e) => {
            send_error_and_close(&out_tx, &e.to_string());
            drop(out_tx);
            writer.await.ok();
            return;
        }
    };

    // Fresh root token: the session must survive the upgrade handler's
    // context, which is cancelled when the HTTP handler returns.
    let cancel = CancellationToken::new();
    let (audio_writer, audio_reader) = ingress_channel(config.session.ingress_capacity);

    let recognizer = TranslationRecognizer::new(
        session_id.clone(),
        SpeechConfig {
            source_language: params.source_language.clone(),
            target_languages: vec![params.target_language.clone()],
        },
        config.upstream_settings(),
        audio_reader,
        cancel.clone(),
    );

    let session = StreamingSession::new(
        session_id.clone(),
        params.source_language.clone(),
        params.target_language.clone(),
        params.audio_format.clone(),
        Arc::clone(&recognizer),
        cancel.clone(),
    );

    if let Err(e) = registry.insert(Arc::clone(&session)) {
        send_error_and_close(&out_tx, &e.to_string());
        drop(out_tx);
        writer.await.ok();
        return;
    }
    let _guard = SessionGuard {
        session_id: session_id.clone(),
        registry: Arc::clone(&registry),
    };

    let _ = out_tx.send(
        to_message(&ReadyFrame {
            status: "ready",
            session_id: &session_id,
        })
        .expect("ready frame serializes"),
    );

    wire_event_callbacks(&recognizer, &params, &out_tx, &cancel);
    recognizer.events().attach_debug_logging(&session_id);

    // Connect upstream; a failure has already signaled `canceled` (and thus
    // queued the error frame) through the callbacks above.
    let started = recognizer.start_continuous().await.is_ok();

    if started {
        log::info!(
            "[Bridge] Session {} streaming {} → {}",
            session_id,
            params.source_language,
            params.target_language
        );
        read_client_frames(&mut receiver, &session, &audio_writer, &out_tx, &cancel).await;
    }

    // Ordered teardown: stop recognition, close the recognizer (disconnects
    // all event streams), close the audio source, then drop the registry
    // entry. Each step is idempotent.
    recognizer.stop();
    recognizer.close().await;
    audio_writer.close();
    registry.remove(&session_id);
    drop(out_tx);
    writer.await.ok();
    log::info!("[Bridge] Session {} teardown complete", session_id);
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Phases
// ─────────────────────────────────────────────────────────────────────────────

async fn read_setup_frame(
    receiver: &mut SplitStream<WebSocket>,
) -> Result<SetupRequest, String> {
    match receiver.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<SetupRequest>(&text)
            .map_err(|e| format!("invalid setup frame: {e}")),
        Some(Ok(_)) => Err("expected a JSON setup frame before audio".to_string()),
        Some(Err(e)) => Err(format!("failed to read setup frame: {e}")),
        None => Err("connection closed before setup frame".to_string()),
    }
}

fn wire_event_callbacks(
    recognizer: &Arc<TranslationRecognizer>,
    params: &SessionParams,
    out_tx: &mpsc::UnboundedSender<Message>,
    cancel: &CancellationToken,
) {
    let events = recognizer.events();

    let translation_frame = {
        let source = params.source_language.clone();
        let target = params.target_language.clone();
        move |result: &crate::recognizer::result::RecognitionResult, is_final: bool| {
            TranslationFrame {
                source_language: source.clone(),
                target_language: target.clone(),
                translated_text: result
                    .translation_for(&target)
                    .unwrap_or_default()
                    .to_string(),
                original_text: result.text.clone(),
                is_final,
                segment_id: result.segment_id.clone(),
            }
        }
    };

    {
        let out_tx = out_tx.clone();
        let frame = translation_frame.clone();
        events.recognizing.connect(move |result| {
            if let Some(msg) = to_message(&frame(result, false)) {
                let _ = out_tx.send(msg);
            }
        });
    }
    {
        let out_tx = out_tx.clone();
        let frame = translation_frame;
        events.recognized.connect(move |result| {
            if result.reason == ResultReason::NoMatch {
                log::debug!("[Bridge] Dropping no-match result for {}", result.segment_id);
                return;
            }
            if let Some(msg) = to_message(&frame(result, true)) {
                let _ = out_tx.send(msg);
            }
        });
    }
    {
        let out_tx = out_tx.clone();
        let cancel = cancel.clone();
        events.canceled.connect(move |details| {
            // The one error frame the client is promised; the unbounded
            // channel means it cannot be dropped by backpressure.
            if details.is_error() {
                if let Some(msg) = to_message(&ErrorFrame {
                    error: &details.error_details,
                }) {
                    let _ = out_tx.send(msg);
                }
            }
            cancel.cancel();
        });
    }
    {
        let cancel = cancel.clone();
        events.session_stopped.connect(move |_| {
            cancel.cancel();
        });
    }
}

async fn read_client_frames(
    receiver: &mut SplitStream<WebSocket>,
    session: &Arc<StreamingSession>,
    audio_writer: &AudioWriter,
    out_tx: &mpsc::UnboundedSender<Message>,
    cancel: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Binary(data))) => {
                session.touch();
                // A full ingress buffer blocks here, throttling the client.
                if audio_writer.write(&data).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientText>(&text) {
                    Ok(ClientText::Control { kind }) => match kind.as_str() {
                        "init" => {
                            let _ = out_tx.send(
                                to_message(&InitResponseFrame {
                                    kind: "init_response",
                                    status: "ready",
                                })
                                .expect("init response serializes"),
                            );
                        }
                        "end" => session.recognizer.stop(),
                        other => {
                            log::debug!("[Bridge] Ignoring control message: {}", other);
                        }
                    },
                    Ok(ClientText::LegacyAudio { audio }) => match BASE64.decode(&audio.data) {
                        Ok(decoded) => {
                            session.touch();
                            if audio_writer.write(&decoded).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::debug!("[Bridge] Invalid base64 audio payload: {}", e);
                        }
                    },
                    Err(_) => {
                        log::debug!("[Bridge] Ignoring unrecognized text frame");
                    }
                }
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            _ => {} // ping/pong handled by axum
        }
    }
}

async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = out_rx.recv().await {
        if sender.send(message).await.is_err() {
            break;
        }
    }
    // Normal closure after the last frame; best effort.
    let _ = sender.send(Message::Close(None)).await;
}

fn send_error_and_close(out_tx: &mpsc::UnboundedSender<Message>, message: &str) {
    log::warn!("[Bridge] Rejecting session: {}", message);
    if let Some(msg) = to_message(&ErrorFrame { error: message }) {
        let _ = out_tx.send(msg);
    }
}
