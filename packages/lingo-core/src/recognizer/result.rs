//! Recognition result and cancellation types.
//!
//! Produced by the upstream codec from decoded `speech.phrase` /
//! `speech.hypothesis` frames; consumed by the client bridge.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CancellationErrorCode;

/// Why a recognition result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultReason {
    /// Final recognition for a segment; no further updates follow.
    Recognized,
    /// Interim recognition, superseded by a later final for the same segment.
    Hypothesis,
    /// The session was canceled before a result was produced.
    Canceled,
    /// The provider recognized no speech in the segment.
    NoMatch,
}

/// One recognition event, interim or final, with its translations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    /// Correlation id of the producing upstream request.
    pub result_id: String,
    /// Identifies the speech segment this result belongs to. Hypotheses and
    /// the final result for one segment share the same id.
    pub segment_id: String,
    /// Recognized text in the source language.
    pub text: String,
    /// Result classification.
    pub reason: ResultReason,
    /// Offset of the segment from the start of the audio stream (ns).
    pub offset_nanos: u64,
    /// Duration of the segment (ns).
    pub duration_nanos: u64,
    /// Target language code → translated text.
    pub translations: HashMap<String, String>,
}

impl RecognitionResult {
    /// Returns the translation for `language`, if the provider produced one.
    #[must_use]
    pub fn translation_for(&self, language: &str) -> Option<&str> {
        self.translations.get(language).map(String::as_str)
    }

    /// Whether this is the final result for its segment.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.reason == ResultReason::Recognized
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

/// Why a session was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CancellationReason {
    /// A failure ended the session.
    Error,
    /// The audio source reached end of stream.
    EndOfStream,
}

/// Details carried by a `canceled` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationDetails {
    /// Why the session was canceled.
    pub reason: CancellationReason,
    /// Classified error code (`noError` for end of stream).
    pub error_code: CancellationErrorCode,
    /// Human-readable failure description, empty for a clean end.
    pub error_details: String,
}

impl CancellationDetails {
    /// Cancellation caused by a failure.
    pub fn from_error(error_code: CancellationErrorCode, details: impl Into<String>) -> Self {
        Self {
            reason: CancellationReason::Error,
            error_code,
            error_details: details.into(),
        }
    }

    /// Clean cancellation: the audio source ended.
    #[must_use]
    pub fn end_of_stream() -> Self {
        Self {
            reason: CancellationReason::EndOfStream,
            error_code: CancellationErrorCode::NoError,
            error_details: String::new(),
        }
    }

    /// Whether this cancellation represents a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.reason == CancellationReason::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(reason: ResultReason) -> RecognitionResult {
        RecognitionResult {
            result_id: "req1".into(),
            segment_id: "seg-0".into(),
            text: "こんにちは".into(),
            reason,
            offset_nanos: 1_000_000,
            duration_nanos: 2_000_000,
            translations: HashMap::from([("en".to_string(), "hello".to_string())]),
        }
    }

    #[test]
    fn translation_lookup() {
        let result = result_with(ResultReason::Recognized);
        assert_eq!(result.translation_for("en"), Some("hello"));
        assert_eq!(result.translation_for("fr"), None);
    }

    #[test]
    fn only_recognized_is_final() {
        assert!(result_with(ResultReason::Recognized).is_final());
        assert!(!result_with(ResultReason::Hypothesis).is_final());
        assert!(!result_with(ResultReason::NoMatch).is_final());
    }

    #[test]
    fn result_serializes_camel_case() {
        let json = serde_json::to_value(result_with(ResultReason::Hypothesis)).unwrap();
        assert_eq!(json["reason"], "hypothesis");
        assert_eq!(json["segmentId"], "seg-0");
        assert_eq!(json["offsetNanos"], 1_000_000);
        assert_eq!(json["translations"]["en"], "hello");
    }

    #[test]
    fn end_of_stream_cancellation_is_clean() {
        let details = CancellationDetails::end_of_stream();
        assert!(!details.is_error());
        assert_eq!(details.error_code, CancellationErrorCode::NoError);
        assert!(details.error_details.is_empty());
    }

    #[test]
    fn error_cancellation_carries_code() {
        let details =
            CancellationDetails::from_error(CancellationErrorCode::AuthFailure, "401 from dial");
        assert!(details.is_error());
        assert_eq!(details.error_code, CancellationErrorCode::AuthFailure);
        assert_eq!(details.error_details, "401 from dial");
    }
}
