//! Streaming session records, registry, and client bridge.

pub mod bridge;
pub mod registry;

pub use registry::SessionRegistry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::recognizer::TranslationRecognizer;
use crate::utils::now_millis;

/// One live pairing of a client transport with an upstream transport.
///
/// Created by the client bridge on connect; mutated only by the owning
/// recognizer tasks and by the registry sweep (which reads `last_access`).
/// Destroyed when the client transport closes, the upstream transport fails,
/// or the sweep evicts it.
pub struct StreamingSession {
    /// Opaque URL-safe unique id.
    pub id: String,
    /// Normalized BCP-47 source language (`ja-JP`).
    pub source_language: String,
    /// Normalized ISO 639-1 target language (`en`).
    pub target_language: String,
    /// Accepted audio format (lowercased).
    pub audio_format: String,
    /// The session's recognizer.
    pub recognizer: Arc<TranslationRecognizer>,
    /// Per-session cancellation handle; derives from a fresh root so the
    /// session survives the inbound HTTP handler's context.
    pub cancel: CancellationToken,
    /// Unix millis of the last client activity.
    last_access: AtomicU64,
}

impl StreamingSession {
    /// Creates a session record with `last_access` set to now.
    pub fn new(
        id: String,
        source_language: String,
        target_language: String,
        audio_format: String,
        recognizer: Arc<TranslationRecognizer>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            source_language,
            target_language,
            audio_format,
            recognizer,
            cancel,
            last_access: AtomicU64::new(now_millis()),
        })
    }

    /// Records client activity, deferring idle eviction.
    pub fn touch(&self) {
        self.last_access.store(now_millis(), Ordering::Relaxed);
    }

    /// Unix millis of the last recorded activity.
    #[must_use]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Milliseconds of inactivity relative to `now`.
    #[must_use]
    pub fn idle_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_access())
    }
}
