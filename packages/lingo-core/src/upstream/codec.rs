//! Codec for the provider's framed WebSocket protocol.
//!
//! Text frames carry a CRLF-terminated header block (`Name: value` lines,
//! terminated by a blank line) followed by a JSON body. Binary frames carry
//! raw audio bytes and must be preceded by a text frame with `Path: audio`
//! announcing the same `X-RequestId`.
//!
//! Outbound, the codec emits two envelopes per session: the configuration
//! envelope (`Path: speech.config`) and, per audio request, the audio
//! envelope (`Path: audio`, empty body). Inbound, it classifies frames by
//! `Path` into typed [`UpstreamEvent`]s.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::error::CancellationErrorCode;
use crate::protocol_constants::{
    AUDIO_SAMPLE_RATE, CONTENT_TYPE_AUDIO, CONTENT_TYPE_JSON, END_OF_SPEECH_TIMEOUT_MS,
    HEADER_CONTENT_TYPE, HEADER_PATH, HEADER_REQUEST_ID, HEADER_TIMESTAMP, SDK_SYSTEM_BUILD,
    SDK_SYSTEM_NAME, SDK_SYSTEM_VERSION,
};
use crate::recognizer::result::{CancellationDetails, RecognitionResult, ResultReason};

// Wire values of the `Path` header.
const PATH_SPEECH_CONFIG: &str = "speech.config";
const PATH_AUDIO: &str = "audio";
const PATH_TURN_START: &str = "turn.start";
const PATH_TURN_END: &str = "turn.end";
const PATH_SPEECH_HYPOTHESIS: &str = "speech.hypothesis";
const PATH_SPEECH_PHRASE: &str = "speech.phrase";
const PATH_SPEECH_START_DETECTED: &str = "speech.startDetected";
const PATH_SPEECH_END_DETECTED: &str = "speech.endDetected";
const PATH_ERROR: &str = "error";

/// Provider offsets and durations arrive in 100 ns ticks.
const NANOS_PER_TICK: u64 = 100;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A text frame without the required `Path` header.
    #[error("frame is missing the Path header")]
    MissingPath,

    /// A header line that is not `Name: value`.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// A text frame without the blank line separating headers from body.
    #[error("frame is missing the header/body separator")]
    MissingSeparator,

    /// The JSON body failed to parse.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Per-session recognition configuration sent in the `speech.config` envelope.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Normalized BCP-47 source language (`ja-JP`).
    pub source_language: String,
    /// Normalized bare target language codes (`en`).
    pub target_languages: Vec<String>,
}

/// Builds a framed text message: header block, blank line, body.
fn encode_text_frame(path: &str, request_id: &str, content_type: &str, body: &str) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        "{HEADER_PATH}: {path}\r\n\
         {HEADER_REQUEST_ID}: {request_id}\r\n\
         {HEADER_TIMESTAMP}: {timestamp}\r\n\
         {HEADER_CONTENT_TYPE}: {content_type}\r\n\
         \r\n\
         {body}"
    )
}

/// Encodes the configuration envelope for a session.
pub fn speech_config_frame(config: &SpeechConfig, request_id: &str) -> String {
    let body = json!({
        "context": {
            "system": {
                "name": SDK_SYSTEM_NAME,
                "version": SDK_SYSTEM_VERSION,
                "build": SDK_SYSTEM_BUILD,
            }
        },
        "config": {
            "speechConfig": {
                "speechRecognitionLanguage": config.source_language,
                "translationLanguages": config.target_languages,
                "sourceLanguageForTranslation": config.source_language,
                "features": {
                    "enableTranslation": true,
                    "wordLevelTimestamps": true,
                    "punctuation": "explicit",
                },
                "profanity": "masked",
                "timeToDetectEndOfSpeech": END_OF_SPEECH_TIMEOUT_MS,
                "scenarios": ["conversation"],
            },
            "input": {
                "format": CONTENT_TYPE_AUDIO,
                "audioParameters": {
                    "sampleRate": AUDIO_SAMPLE_RATE,
                }
            }
        }
    });
    encode_text_frame(PATH_SPEECH_CONFIG, request_id, CONTENT_TYPE_JSON, &body.to_string())
}

/// Encodes the audio envelope announcing a binary frame.
///
/// The body is empty; the binary frame that follows must be sent on the same
/// connection with no interleaved writes, reusing this `request_id`.
pub fn audio_frame_header(request_id: &str) -> String {
    encode_text_frame(PATH_AUDIO, request_id, CONTENT_TYPE_AUDIO, "")
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed header block of an inbound text frame.
#[derive(Debug, Clone, Default)]
pub struct FrameHeaders {
    /// Message kind. Required.
    pub path: String,
    /// Correlation id, when present.
    pub request_id: Option<String>,
    /// RFC3339 timestamp, when present.
    pub timestamp: Option<String>,
    /// Body content type, when present.
    pub content_type: Option<String>,
}

/// Typed events decoded from inbound frames.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// The provider opened a speech turn. Logged; no visible effect.
    TurnStarted {
        /// Correlation id of the turn, when announced.
        request_id: Option<String>,
    },
    /// Interim recognition for a segment.
    Hypothesis(RecognitionResult),
    /// A `speech.phrase` frame: final, interim, or no-match.
    Phrase(RecognitionResult),
    /// The provider detected the onset of speech.
    SpeechStartDetected {
        /// Offset from the start of the audio stream (ns).
        offset_nanos: u64,
    },
    /// The provider detected the end of speech.
    SpeechEndDetected {
        /// Offset from the start of the audio stream (ns).
        offset_nanos: u64,
    },
    /// The provider closed the current speech turn.
    TurnEnded,
    /// The provider reported a failure.
    ServiceError(CancellationDetails),
    /// The socket closed. Emitted by the connection reader, never decoded
    /// from a frame; `None` means a clean close.
    Disconnected(Option<CancellationDetails>),
}

/// Splits a text frame into its header block and body at the first blank line.
///
/// The wire format uses CRLF; bare LF separators are tolerated.
fn split_frame(frame: &str) -> Result<(&str, &str), CodecError> {
    if let Some(at) = frame.find("\r\n\r\n") {
        return Ok((&frame[..at], &frame[at + 4..]));
    }
    if let Some(at) = frame.find("\n\n") {
        return Ok((&frame[..at], &frame[at + 2..]));
    }
    Err(CodecError::MissingSeparator)
}

/// Parses the header block into [`FrameHeaders`].
///
/// Unrecognized header names are ignored; the `Path` header is required.
pub fn parse_headers(block: &str) -> Result<FrameHeaders, CodecError> {
    let mut headers = FrameHeaders::default();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedHeader(line.to_string()))?;
        let value = value.trim();
        match name.trim() {
            n if n.eq_ignore_ascii_case(HEADER_PATH) => headers.path = value.to_string(),
            n if n.eq_ignore_ascii_case(HEADER_REQUEST_ID) => {
                headers.request_id = Some(value.to_string());
            }
            n if n.eq_ignore_ascii_case(HEADER_TIMESTAMP) => {
                headers.timestamp = Some(value.to_string());
            }
            n if n.eq_ignore_ascii_case(HEADER_CONTENT_TYPE) => {
                headers.content_type = Some(value.to_string());
            }
            _ => {}
        }
    }
    if headers.path.is_empty() {
        return Err(CodecError::MissingPath);
    }
    Ok(headers)
}

#[derive(Deserialize)]
struct HypothesisBody {
    #[serde(rename = "Id", default)]
    id: Option<String>,
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "Offset", default)]
    offset: u64,
    #[serde(rename = "Duration", default)]
    duration: u64,
    #[serde(rename = "Translations", default)]
    translations: HashMap<String, String>,
}

#[derive(Deserialize)]
struct NBestEntry {
    #[serde(rename = "Display", default)]
    display: String,
}

#[derive(Deserialize)]
struct PhraseBody {
    #[serde(rename = "Id", default)]
    id: Option<String>,
    #[serde(rename = "RecognitionStatus", default)]
    recognition_status: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "Offset", default)]
    offset: u64,
    #[serde(rename = "Duration", default)]
    duration: u64,
    #[serde(rename = "NBest", default)]
    n_best: Vec<NBestEntry>,
    #[serde(rename = "Translations", default)]
    translations: HashMap<String, String>,
}

#[derive(Deserialize)]
struct DetectedBody {
    #[serde(rename = "Offset", default)]
    offset: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "Status", default)]
    status: Option<u16>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// Segment id: the provider's id when announced, else derived from the
/// segment offset so hypotheses and the final phrase of one segment agree.
fn segment_id(id: Option<String>, offset: u64) -> String {
    id.unwrap_or_else(|| format!("seg-{offset}"))
}

/// Returns the failure status of a body, if it carries one.
///
/// Frames other than `Path: error` can announce failures through a numeric
/// top-level `Status` field.
fn failure_status(body: &str) -> Option<u16> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let status = value.get("Status")?.as_u64()? as u16;
    (status >= 400).then_some(status)
}

/// Decodes one inbound text frame into a typed event.
///
/// Returns `Ok(None)` for unknown `Path` values, which are logged at debug
/// and otherwise ignored.
pub fn decode_text_frame(frame: &str) -> Result<Option<UpstreamEvent>, CodecError> {
    let (header_block, body) = split_frame(frame)?;
    let headers = parse_headers(header_block)?;

    if headers.path != PATH_ERROR {
        if let Some(status) = failure_status(body) {
            let message: ErrorBody = serde_json::from_str(body).unwrap_or(ErrorBody {
                status: Some(status),
                message: None,
            });
            return Ok(Some(UpstreamEvent::ServiceError(service_error(
                Some(status),
                message.message,
            ))));
        }
    }

    match headers.path.as_str() {
        PATH_TURN_START => Ok(Some(UpstreamEvent::TurnStarted {
            request_id: headers.request_id,
        })),
        PATH_TURN_END => Ok(Some(UpstreamEvent::TurnEnded)),
        PATH_SPEECH_START_DETECTED => {
            let parsed: DetectedBody = serde_json::from_str(body)?;
            Ok(Some(UpstreamEvent::SpeechStartDetected {
                offset_nanos: parsed.offset * NANOS_PER_TICK,
            }))
        }
        PATH_SPEECH_END_DETECTED => {
            let parsed: DetectedBody = serde_json::from_str(body)?;
            Ok(Some(UpstreamEvent::SpeechEndDetected {
                offset_nanos: parsed.offset * NANOS_PER_TICK,
            }))
        }
        PATH_SPEECH_HYPOTHESIS => {
            let parsed: HypothesisBody = serde_json::from_str(body)?;
            let segment = segment_id(parsed.id, parsed.offset);
            Ok(Some(UpstreamEvent::Hypothesis(RecognitionResult {
                result_id: headers.request_id.unwrap_or_else(|| segment.clone()),
                segment_id: segment,
                text: parsed.text,
                reason: ResultReason::Hypothesis,
                offset_nanos: parsed.offset * NANOS_PER_TICK,
                duration_nanos: parsed.duration * NANOS_PER_TICK,
                translations: parsed.translations,
            })))
        }
        PATH_SPEECH_PHRASE => {
            let parsed: PhraseBody = serde_json::from_str(body)?;
            let reason = match (parsed.recognition_status.as_str(), parsed.kind.as_str()) {
                ("Success", "final") => ResultReason::Recognized,
                ("NoMatch", _) => ResultReason::NoMatch,
                // Success with any other type is still interim.
                _ => ResultReason::Hypothesis,
            };
            let text = parsed
                .n_best
                .into_iter()
                .next()
                .map(|n| n.display)
                .unwrap_or_default();
            let segment = segment_id(parsed.id, parsed.offset);
            Ok(Some(UpstreamEvent::Phrase(RecognitionResult {
                result_id: headers.request_id.unwrap_or_else(|| segment.clone()),
                segment_id: segment,
                text,
                reason,
                offset_nanos: parsed.offset * NANOS_PER_TICK,
                duration_nanos: parsed.duration * NANOS_PER_TICK,
                translations: parsed.translations,
            })))
        }
        PATH_ERROR => {
            let parsed: ErrorBody = serde_json::from_str(body).unwrap_or(ErrorBody {
                status: None,
                message: Some(body.to_string()),
            });
            Ok(Some(UpstreamEvent::ServiceError(service_error(
                parsed.status,
                parsed.message,
            ))))
        }
        other => {
            log::debug!("[Codec] Ignoring frame with unknown Path: {}", other);
            Ok(None)
        }
    }
}

fn service_error(status: Option<u16>, message: Option<String>) -> CancellationDetails {
    let code = status
        .map(CancellationErrorCode::from_http_status)
        .unwrap_or(CancellationErrorCode::ServiceError);
    let details = match (status, message) {
        (Some(s), Some(m)) => format!("upstream status {s}: {m}"),
        (Some(s), None) => format!("upstream status {s}"),
        (None, Some(m)) => m,
        (None, None) => "upstream error".to_string(),
    };
    CancellationDetails::from_error(code, details)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(path: &str, body: &str) -> String {
        format!(
            "Path: {path}\r\nX-RequestId: req42\r\nX-Timestamp: 2024-05-01T00:00:00.000Z\r\nContent-Type: application/json\r\n\r\n{body}"
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Encoding
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn speech_config_frame_has_headers_and_expected_body() {
        let config = SpeechConfig {
            source_language: "ja-JP".into(),
            target_languages: vec!["en".into(), "fr".into()],
        };
        let encoded = speech_config_frame(&config, "abc123");

        let (headers, body) = split_frame(&encoded).unwrap();
        let parsed = parse_headers(headers).unwrap();
        assert_eq!(parsed.path, "speech.config");
        assert_eq!(parsed.request_id.as_deref(), Some("abc123"));
        assert_eq!(parsed.content_type.as_deref(), Some("application/json"));
        assert!(parsed.timestamp.is_some());

        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        let speech = &json["config"]["speechConfig"];
        assert_eq!(speech["speechRecognitionLanguage"], "ja-JP");
        assert_eq!(speech["sourceLanguageForTranslation"], "ja-JP");
        assert_eq!(speech["translationLanguages"][1], "fr");
        assert_eq!(speech["features"]["enableTranslation"], true);
        assert_eq!(speech["timeToDetectEndOfSpeech"], "1500");
        assert_eq!(json["config"]["input"]["audioParameters"]["sampleRate"], 16000);
        assert_eq!(json["context"]["system"]["name"], "SpeechSDK");
    }

    #[test]
    fn audio_header_announces_binary_content() {
        let encoded = audio_frame_header("abc123");
        let (headers, body) = split_frame(&encoded).unwrap();
        let parsed = parse_headers(headers).unwrap();
        assert_eq!(parsed.path, "audio");
        assert_eq!(parsed.request_id.as_deref(), Some("abc123"));
        assert_eq!(parsed.content_type.as_deref(), Some("audio/x-wav"));
        assert!(body.is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Header Parsing
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn missing_path_is_rejected() {
        let err = decode_text_frame("X-RequestId: x\r\n\r\n{}").unwrap_err();
        assert!(matches!(err, CodecError::MissingPath));
    }

    #[test]
    fn missing_separator_is_rejected() {
        let err = decode_text_frame("Path: turn.start").unwrap_err();
        assert!(matches!(err, CodecError::MissingSeparator));
    }

    #[test]
    fn malformed_header_line_is_rejected() {
        let err = decode_text_frame("Path turn.start\r\n\r\n{}").unwrap_err();
        assert!(matches!(err, CodecError::MalformedHeader(_)));
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let decoded =
            decode_text_frame("path: turn.start\r\nx-requestid: r1\r\n\r\n{}").unwrap();
        assert!(matches!(
            decoded,
            Some(UpstreamEvent::TurnStarted { request_id: Some(ref r) }) if r == "r1"
        ));
    }

    #[test]
    fn bare_lf_separator_is_tolerated() {
        let decoded = decode_text_frame("Path: turn.end\n\n{}").unwrap();
        assert!(matches!(decoded, Some(UpstreamEvent::TurnEnded)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Classification
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn hypothesis_decodes_as_interim() {
        let body = r#"{"Text":"こんに","Offset":500,"Duration":1000,"Translations":{"en":"hel"}}"#;
        let decoded = decode_text_frame(&frame("speech.hypothesis", body)).unwrap();
        let Some(UpstreamEvent::Hypothesis(result)) = decoded else {
            panic!("expected hypothesis, got {decoded:?}");
        };
        assert_eq!(result.reason, ResultReason::Hypothesis);
        assert_eq!(result.text, "こんに");
        assert_eq!(result.offset_nanos, 50_000);
        assert_eq!(result.duration_nanos, 100_000);
        assert_eq!(result.translations["en"], "hel");
        assert_eq!(result.segment_id, "seg-500");
        assert_eq!(result.result_id, "req42");
    }

    #[test]
    fn final_phrase_takes_display_from_first_nbest() {
        let body = r#"{"RecognitionStatus":"Success","type":"final","Offset":500,"Duration":2000,
            "NBest":[{"Display":"こんにちは。"},{"Display":"こんにちわ。"}],
            "Translations":{"en":"Hello."}}"#;
        let decoded = decode_text_frame(&frame("speech.phrase", body)).unwrap();
        let Some(UpstreamEvent::Phrase(result)) = decoded else {
            panic!("expected phrase, got {decoded:?}");
        };
        assert_eq!(result.reason, ResultReason::Recognized);
        assert_eq!(result.text, "こんにちは。");
        assert_eq!(result.translations["en"], "Hello.");
        assert_eq!(result.segment_id, "seg-500");
    }

    #[test]
    fn non_final_phrase_is_interim() {
        let body = r#"{"RecognitionStatus":"Success","type":"partial","Offset":1,
            "NBest":[{"Display":"part"}]}"#;
        let decoded = decode_text_frame(&frame("speech.phrase", body)).unwrap();
        let Some(UpstreamEvent::Phrase(result)) = decoded else {
            panic!("expected phrase");
        };
        assert_eq!(result.reason, ResultReason::Hypothesis);
    }

    #[test]
    fn no_match_phrase_is_classified() {
        let body = r#"{"RecognitionStatus":"NoMatch","Offset":7}"#;
        let decoded = decode_text_frame(&frame("speech.phrase", body)).unwrap();
        let Some(UpstreamEvent::Phrase(result)) = decoded else {
            panic!("expected phrase");
        };
        assert_eq!(result.reason, ResultReason::NoMatch);
        assert!(result.text.is_empty());
    }

    #[test]
    fn hypothesis_and_final_share_segment_id() {
        let hyp = r#"{"Text":"a","Offset":900,"Duration":1}"#;
        let fin = r#"{"RecognitionStatus":"Success","type":"final","Offset":900,
            "NBest":[{"Display":"ab"}]}"#;
        let Some(UpstreamEvent::Hypothesis(h)) =
            decode_text_frame(&frame("speech.hypothesis", hyp)).unwrap()
        else {
            panic!()
        };
        let Some(UpstreamEvent::Phrase(f)) =
            decode_text_frame(&frame("speech.phrase", fin)).unwrap()
        else {
            panic!()
        };
        assert_eq!(h.segment_id, f.segment_id);
    }

    #[test]
    fn error_path_maps_status_to_cancellation_code() {
        let body = r#"{"Status":429,"Message":"slow down"}"#;
        let decoded = decode_text_frame(&frame("error", body)).unwrap();
        let Some(UpstreamEvent::ServiceError(details)) = decoded else {
            panic!("expected service error");
        };
        assert_eq!(details.error_code, CancellationErrorCode::TooManyRequests);
        assert!(details.error_details.contains("slow down"));
    }

    #[test]
    fn failure_status_on_any_path_becomes_error() {
        let body = r#"{"Status":503}"#;
        let decoded = decode_text_frame(&frame("turn.start", body)).unwrap();
        let Some(UpstreamEvent::ServiceError(details)) = decoded else {
            panic!("expected service error");
        };
        assert_eq!(
            details.error_code,
            CancellationErrorCode::ServiceUnavailable
        );
    }

    #[test]
    fn speech_detection_frames_carry_offsets() {
        let decoded =
            decode_text_frame(&frame("speech.startDetected", r#"{"Offset":1000}"#)).unwrap();
        assert!(matches!(
            decoded,
            Some(UpstreamEvent::SpeechStartDetected { offset_nanos: 100_000 })
        ));

        let decoded =
            decode_text_frame(&frame("speech.endDetected", r#"{"Offset":2000}"#)).unwrap();
        assert!(matches!(
            decoded,
            Some(UpstreamEvent::SpeechEndDetected { offset_nanos: 200_000 })
        ));
    }

    #[test]
    fn unknown_path_is_ignored() {
        let decoded = decode_text_frame(&frame("speech.keyword", "{}")).unwrap();
        assert!(decoded.is_none());
    }
}
