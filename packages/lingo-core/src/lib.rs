//! Lingo Core - shared library for Lingo Relay.
//!
//! This crate provides the core functionality for Lingo Relay, a real-time
//! speech translation gateway: it terminates client WebSocket connections
//! carrying streamed microphone audio, forwards the audio to an upstream
//! cloud speech provider over a framed WebSocket protocol, and pushes
//! translated-text updates back to the client. It is designed to be used by
//! the standalone headless server and by embedders.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`language`]: Language-code normalization gating every session
//! - [`audio`]: Bounded audio ingress buffering (the backpressure point)
//! - [`upstream`]: Framed provider protocol - codec and connection
//! - [`recognizer`]: Per-session orchestration and typed event streams
//! - [`session`]: Session records, registry with idle eviction, client bridge
//! - [`service`]: The `SpeechService` capability interface
//! - [`api`]: HTTP/WebSocket surface
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! Handlers depend on [`SpeechService`](service::SpeechService) rather than
//! concrete implementations, so the HTTP surface can be exercised against a
//! test fake while production wires in the cloud-backed service.

#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod error;
pub mod language;
pub mod protocol_constants;
pub mod recognizer;
pub mod service;
pub mod session;
pub mod state;
pub mod upstream;
pub mod utils;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use error::{CancellationErrorCode, ErrorCode, LingoError, LingoResult};
pub use language::{normalize_source, normalize_target, LanguageError};
pub use recognizer::result::{
    CancellationDetails, CancellationReason, RecognitionResult, ResultReason,
};
pub use recognizer::{RecognizerState, TranslationRecognizer};
pub use service::{
    CloudSpeechService, SpeechService, StartSessionRequest, StartSessionResponse,
    TranslationRequest, TranslationResponse,
};
pub use session::{SessionRegistry, StreamingSession};
pub use state::{Config, SessionConfig};
pub use utils::now_millis;
