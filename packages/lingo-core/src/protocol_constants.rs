//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the upstream speech provider's framed
//! WebSocket protocol and by the audio contract with clients; changing them
//! would break protocol compliance.

// ─────────────────────────────────────────────────────────────────────────────
// Upstream Endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Host suffix for the upstream speech endpoint. The full host is
/// `{region}` + this suffix.
pub const UPSTREAM_HOST_SUFFIX: &str = ".stt.speech.microsoft.com";

/// Path of the universal speech endpoint (v2 carries translation).
pub const UPSTREAM_PATH: &str = "/speech/universal/v2";

// ─────────────────────────────────────────────────────────────────────────────
// Framed Message Headers
// ─────────────────────────────────────────────────────────────────────────────

/// Message kind header. Required on every text frame.
pub const HEADER_PATH: &str = "Path";

/// Per-request correlation UUID header.
pub const HEADER_REQUEST_ID: &str = "X-RequestId";

/// RFC3339 timestamp header.
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";

/// Body content type header.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Content type of JSON envelope bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type announcing binary audio frames.
pub const CONTENT_TYPE_AUDIO: &str = "audio/x-wav";

// ─────────────────────────────────────────────────────────────────────────────
// Audio Contract
// ─────────────────────────────────────────────────────────────────────────────

/// Sample rate the service accepts and forwards (PCM16 mono).
pub const AUDIO_SAMPLE_RATE: u32 = 16000;

/// Recommended upper bound for a single audio chunk (bytes).
///
/// Not enforced as a hard limit; the ingress buffer accepts larger chunks.
pub const RECOMMENDED_CHUNK_BYTES: usize = 8 * 1024;

/// Capacity of the per-session audio ingress buffer (chunks).
///
/// ~100 chunks of 8 KiB bounds per-session memory at roughly 800 KiB and is
/// the sole backpressure point between client and upstream.
pub const INGRESS_CAPACITY_CHUNKS: usize = 100;

/// Audio formats accepted in the client setup frame (lowercased).
pub const ALLOWED_AUDIO_FORMATS: [&str; 4] = ["wav", "mp3", "ogg", "flac"];

// ─────────────────────────────────────────────────────────────────────────────
// Recognizer Timing
// ─────────────────────────────────────────────────────────────────────────────

/// Silence window after which the provider closes a speech turn (ms).
///
/// Sent as a string in the configuration envelope per the wire format.
pub const END_OF_SPEECH_TIMEOUT_MS: &str = "1500";

/// Backoff applied by the audio pump when a read yields zero bytes (ms).
pub const EMPTY_READ_BACKOFF_MS: u64 = 10;

/// Timeout for single-shot recognition (seconds).
pub const RECOGNIZE_ONCE_TIMEOUT_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Session Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of concurrent streaming sessions.
///
/// Sessions are pinned to this process, so the cap bounds total memory at
/// roughly `MAX_CONCURRENT_SESSIONS * INGRESS_CAPACITY_CHUNKS * 8 KiB`.
pub const MAX_CONCURRENT_SESSIONS: usize = 50;

/// Interval between idle-eviction sweeps (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 30;

/// Idle time after which a session is evicted (seconds).
pub const SESSION_MAX_IDLE_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Channel Capacities
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the upstream event channel (decoded frames awaiting fanout).
pub const UPSTREAM_EVENT_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name reported in the upstream configuration envelope.
pub const SDK_SYSTEM_NAME: &str = "SpeechSDK";

/// SDK version string reported in the configuration envelope.
pub const SDK_SYSTEM_VERSION: &str = "1.34.0";

/// SDK build tag reported in the configuration envelope.
pub const SDK_SYSTEM_BUILD: &str = "rust";

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "lingo-relay";
