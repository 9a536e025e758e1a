//! Upstream speech provider protocol: framed codec and connection.

pub mod codec;
pub mod connection;

pub use codec::{CodecError, SpeechConfig, UpstreamEvent};
pub use connection::{UpstreamConnection, UpstreamCredentials, UpstreamError, UpstreamSettings};
