//! Speech service capability interface and its cloud-backed implementation.
//!
//! Handlers depend on the narrow [`SpeechService`] trait rather than the
//! concrete gateway, enabling test fakes and alternative backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{LingoError, LingoResult};
use crate::language::{normalize_source, normalize_target};
use crate::protocol_constants::ALLOWED_AUDIO_FORMATS;
use crate::recognizer::result::RecognitionResult;
use crate::session::SessionRegistry;
use crate::state::Config;
use crate::utils::new_session_id;

/// Endpoint of the cloud text-translation provider.
const TRANSLATOR_ENDPOINT: &str = "https://api.cognitive.microsofttranslator.com/translate";

/// API version pinned for the translator endpoint.
const TRANSLATOR_API_VERSION: &str = "3.0";

/// Timeout for synchronous translation requests (seconds).
const TRANSLATOR_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Synchronous text-translation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

/// Synchronous text-translation response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResponse {
    pub original_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
}

/// Request to provision a streaming session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub source_language: String,
    pub target_language: String,
    pub audio_format: String,
}

/// Provisioned streaming session: the client connects to `web_socket_url`
/// and re-sends its setup frame there.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    #[serde(rename = "webSocketURL")]
    pub web_socket_url: String,
    pub source_language: String,
    pub target_language: String,
}

/// Result of closing a streaming session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSessionResponse {
    pub status: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Narrow capability interface consumed by the HTTP handlers.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Translates one text synchronously.
    async fn translate_text(&self, request: TranslationRequest)
        -> LingoResult<TranslationResponse>;

    /// Validates a session request and provisions a session id + WS path.
    async fn start_streaming_session(
        &self,
        request: StartSessionRequest,
    ) -> LingoResult<StartSessionResponse>;

    /// Deprecated REST audio path: accepts a chunk and discards it.
    ///
    /// The WebSocket flow is canonical; this endpoint only validates that
    /// the session exists and returns an empty result set.
    async fn process_audio_chunk(
        &self,
        session_id: &str,
        audio: Bytes,
    ) -> LingoResult<Vec<RecognitionResult>>;

    /// Terminates a streaming session. Idempotent: closing an unknown or
    /// already-evicted session reports it as already terminated.
    async fn close_streaming_session(&self, session_id: &str)
        -> LingoResult<CloseSessionResponse>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Cloud Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Production implementation backed by the cloud providers and the live
/// session registry.
pub struct CloudSpeechService {
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
    http: reqwest::Client,
}

impl CloudSpeechService {
    /// Creates the service with a pooled HTTP client for translation calls.
    pub fn new(registry: Arc<SessionRegistry>, config: Arc<Config>) -> LingoResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TRANSLATOR_TIMEOUT_SECS))
            .build()
            .map_err(|e| LingoError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            registry,
            config,
            http,
        })
    }
}

/// Translator wire types (provider schema, PascalCase on request).
#[derive(Serialize)]
struct TranslatorRequestItem<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Deserialize)]
struct TranslatorResponseItem {
    translations: Vec<TranslatorTranslation>,
}

#[derive(Deserialize)]
struct TranslatorTranslation {
    text: String,
}

#[async_trait]
impl SpeechService for CloudSpeechService {
    async fn translate_text(
        &self,
        request: TranslationRequest,
    ) -> LingoResult<TranslationResponse> {
        if request.text.trim().is_empty() {
            return Err(LingoError::InvalidRequest("text must not be empty".into()));
        }
        let source = normalize_source(&request.source_language)
            .map_err(LingoError::source_language)?;
        let target = normalize_target(&request.target_language)
            .map_err(LingoError::target_language)?;

        // The translator wants the bare source code, not the BCP-47 pair.
        let source_bare = normalize_target(&source).map_err(LingoError::source_language)?;

        let response = self
            .http
            .post(TRANSLATOR_ENDPOINT)
            .query(&[
                ("api-version", TRANSLATOR_API_VERSION),
                ("from", source_bare.as_str()),
                ("to", target.as_str()),
            ])
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("Ocp-Apim-Subscription-Region", &self.config.region)
            .json(&[TranslatorRequestItem {
                text: &request.text,
            }])
            .send()
            .await
            .map_err(|e| LingoError::Translation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LingoError::Translation(format!(
                "provider returned {status}: {body}"
            )));
        }

        let items: Vec<TranslatorResponseItem> = response
            .json()
            .await
            .map_err(|e| LingoError::Translation(format!("malformed provider response: {e}")))?;

        let translated_text = items
            .into_iter()
            .next()
            .and_then(|item| item.translations.into_iter().next())
            .map(|t| t.text)
            .ok_or_else(|| LingoError::Translation("provider returned no translation".into()))?;

        Ok(TranslationResponse {
            original_text: request.text,
            translated_text,
            source_language: source,
            target_language: target,
        })
    }

    async fn start_streaming_session(
        &self,
        request: StartSessionRequest,
    ) -> LingoResult<StartSessionResponse> {
        let source = normalize_source(&request.source_language)
            .map_err(LingoError::source_language)?;
        let target = normalize_target(&request.target_language)
            .map_err(LingoError::target_language)?;

        let format = request.audio_format.trim().to_ascii_lowercase();
        if !ALLOWED_AUDIO_FORMATS.contains(&format.as_str()) {
            return Err(LingoError::UnsupportedAudioFormat(request.audio_format));
        }

        // The session record itself is constructed when the client connects
        // its WebSocket; here we only hand out the id and the path.
        let session_id = new_session_id();
        Ok(StartSessionResponse {
            web_socket_url: format!("/api/v1/streaming/ws/{session_id}"),
            session_id,
            source_language: source,
            target_language: target,
        })
    }

    async fn process_audio_chunk(
        &self,
        session_id: &str,
        audio: Bytes,
    ) -> LingoResult<Vec<RecognitionResult>> {
        if self.registry.get(session_id).is_none() {
            return Err(LingoError::SessionNotFound(session_id.to_string()));
        }
        log::debug!(
            "[Service] Discarding {} bytes from deprecated REST audio path (session {})",
            audio.len(),
            session_id
        );
        Ok(Vec::new())
    }

    async fn close_streaming_session(
        &self,
        session_id: &str,
    ) -> LingoResult<CloseSessionResponse> {
        match self.registry.remove(session_id) {
            Some(session) => {
                session.recognizer.stop();
                session.cancel.cancel();
                session.recognizer.close().await;
                Ok(CloseSessionResponse {
                    status: "Session terminated".to_string(),
                })
            }
            None => Ok(CloseSessionResponse {
                status: "Session is already terminated".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ingress_channel;
    use crate::recognizer::TranslationRecognizer;
    use crate::session::StreamingSession;
    use crate::upstream::codec::SpeechConfig;
    use tokio_util::sync::CancellationToken;

    fn service() -> CloudSpeechService {
        service_with_registry(Arc::new(SessionRegistry::new()))
    }

    fn service_with_registry(registry: Arc<SessionRegistry>) -> CloudSpeechService {
        let config = Arc::new(Config {
            region: "japaneast".into(),
            subscription_key: "key".into(),
            ..Default::default()
        });
        CloudSpeechService::new(registry, config).unwrap()
    }

    fn live_session(id: &str) -> Arc<StreamingSession> {
        let (_writer, reader) = ingress_channel(4);
        let cancel = CancellationToken::new();
        let recognizer = TranslationRecognizer::new(
            id.to_string(),
            SpeechConfig {
                source_language: "ja-JP".into(),
                target_languages: vec!["en".into()],
            },
            Config {
                region: "japaneast".into(),
                subscription_key: "key".into(),
                ..Default::default()
            }
            .upstream_settings(),
            reader,
            cancel.clone(),
        );
        StreamingSession::new(
            id.to_string(),
            "ja-JP".into(),
            "en".into(),
            "wav".into(),
            recognizer,
            cancel,
        )
    }

    #[tokio::test]
    async fn start_normalizes_and_returns_ws_path() {
        let response = service()
            .start_streaming_session(StartSessionRequest {
                source_language: "ja".into(),
                target_language: "EN".into(),
                audio_format: "WAV".into(),
            })
            .await
            .unwrap();

        assert_eq!(response.source_language, "ja-JP");
        assert_eq!(response.target_language, "en");
        assert_eq!(
            response.web_socket_url,
            format!("/api/v1/streaming/ws/{}", response.session_id)
        );
    }

    #[tokio::test]
    async fn start_rejects_bad_language_and_format() {
        let err = service()
            .start_streaming_session(StartSessionRequest {
                source_language: "xx".into(),
                target_language: "en".into(),
                audio_format: "wav".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid source language code"));

        let err = service()
            .start_streaming_session(StartSessionRequest {
                source_language: "ja-JP".into(),
                target_language: "en".into(),
                audio_format: "mp4".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported audio format"));
    }

    #[tokio::test]
    async fn process_audio_requires_live_session() {
        let err = service()
            .process_audio_chunk("missing", Bytes::from_static(b"pcm"))
            .await
            .unwrap_err();
        assert!(matches!(err, LingoError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn close_unknown_session_reports_already_terminated() {
        let response = service().close_streaming_session("missing").await.unwrap();
        assert_eq!(response.status, "Session is already terminated");
    }

    #[tokio::test]
    async fn close_live_session_terminates_and_removes_it() {
        let registry = Arc::new(SessionRegistry::new());
        let session = live_session("live-1");
        registry.insert(Arc::clone(&session)).unwrap();
        let service = service_with_registry(Arc::clone(&registry));

        let response = service.close_streaming_session("live-1").await.unwrap();
        assert_eq!(response.status, "Session terminated");
        assert!(registry.get("live-1").is_none());
        assert!(session.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn close_after_idle_eviction_reports_already_terminated() {
        let registry = Arc::new(SessionRegistry::new());
        registry.insert(live_session("stale-1")).unwrap();
        let service = service_with_registry(Arc::clone(&registry));

        // Sweep with a zero window evicts the session first.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let evicted = registry.sweep(std::time::Duration::from_millis(1));
        assert_eq!(evicted, vec!["stale-1".to_string()]);

        let response = service.close_streaming_session("stale-1").await.unwrap();
        assert_eq!(response.status, "Session is already terminated");
    }

    #[tokio::test]
    async fn process_audio_discards_for_live_session() {
        let registry = Arc::new(SessionRegistry::new());
        registry.insert(live_session("live-2")).unwrap();
        let service = service_with_registry(registry);

        let results = service
            .process_audio_chunk("live-2", Bytes::from_static(b"pcm"))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn translate_rejects_empty_text() {
        let err = service()
            .translate_text(TranslationRequest {
                text: "  ".into(),
                source_language: "ja".into(),
                target_language: "en".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LingoError::InvalidRequest(_)));
    }

    #[test]
    fn start_response_serializes_ws_url_field() {
        let response = StartSessionResponse {
            session_id: "abc".into(),
            web_socket_url: "/api/v1/streaming/ws/abc".into(),
            source_language: "ja-JP".into(),
            target_language: "en".into(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["webSocketURL"], "/api/v1/streaming/ws/abc");
        assert_eq!(json["sessionId"], "abc");
    }
}
