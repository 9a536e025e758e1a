//! Outbound WebSocket connection to the speech provider.
//!
//! Holds one TLS WebSocket per session. Writes are serialized through a
//! mutex so the configuration envelope, each `Path: audio` text frame, and
//! its binary audio frame arrive in strict order. A dedicated reader task
//! decodes inbound frames into typed [`UpstreamEvent`]s on an internal
//! channel; after [`UpstreamConnection::close`], writes fail and the reader
//! exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::CancellationErrorCode;
use crate::protocol_constants::{UPSTREAM_EVENT_CAPACITY, UPSTREAM_HOST_SUFFIX, UPSTREAM_PATH};
use crate::recognizer::result::CancellationDetails;
use crate::upstream::codec::{self, SpeechConfig, UpstreamEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Credentials for the upstream provider.
///
/// The `Authorization` header carries the bearer token when one is present,
/// falling back to the subscription key; the subscription key header is
/// always sent.
#[derive(Debug, Clone)]
pub struct UpstreamCredentials {
    pub subscription_key: String,
    pub bearer_token: Option<String>,
}

/// Where and how to dial the provider.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Provider region (`japaneast`, `westus2`, …). Forms the host name.
    pub region: String,
    /// Full endpoint URL override (sovereign clouds, private endpoints).
    /// When set, `region` is not used for dialing.
    pub endpoint: Option<String>,
    pub credentials: UpstreamCredentials,
}

impl UpstreamSettings {
    /// Full WebSocket URL: the override when configured, else the regional
    /// public endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!("wss://{}{UPSTREAM_HOST_SUFFIX}{UPSTREAM_PATH}", self.region)
        })
    }
}

/// Errors from dialing or using the upstream connection.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The provider rejected the WebSocket upgrade.
    #[error("upstream handshake rejected: HTTP {status}")]
    Handshake { status: u16 },

    /// The dial failed before an HTTP response (DNS, TCP, TLS).
    #[error("upstream connect failed: {0}")]
    Connect(String),

    /// The established socket failed.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// Write attempted after close.
    #[error("upstream connection closed")]
    Closed,
}

impl UpstreamError {
    /// Maps this error to the cancellation details surfaced to clients.
    #[must_use]
    pub fn to_cancellation(&self) -> CancellationDetails {
        match self {
            Self::Handshake { status } => CancellationDetails::from_error(
                CancellationErrorCode::from_http_status(*status),
                self.to_string(),
            ),
            Self::Connect(_) | Self::Transport(_) | Self::Closed => {
                CancellationDetails::from_error(
                    CancellationErrorCode::ConnectionFailure,
                    self.to_string(),
                )
            }
        }
    }
}

/// One outbound WebSocket to the provider.
pub struct UpstreamConnection {
    writer: tokio::sync::Mutex<WsSink>,
    closed: AtomicBool,
    cancel: CancellationToken,
    connection_id: String,
}

impl UpstreamConnection {
    /// Dials the provider and starts the reader task.
    ///
    /// Returns the connection and the receiving end of its event channel.
    /// The reader pushes decoded events until the socket closes or the
    /// connection is closed locally.
    pub async fn connect(
        settings: &UpstreamSettings,
    ) -> Result<(Arc<Self>, mpsc::Receiver<UpstreamEvent>), UpstreamError> {
        let connection_id = Uuid::new_v4().simple().to_string();
        let mut request = settings
            .url()
            .into_client_request()
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let credentials = &settings.credentials;
        let bearer = credentials
            .bearer_token
            .as_deref()
            .unwrap_or(&credentials.subscription_key);
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            format!("Bearer {bearer}")
                .parse()
                .map_err(|_| UpstreamError::Connect("invalid authorization header".into()))?,
        );
        headers.insert(
            "Ocp-Apim-Subscription-Key",
            credentials
                .subscription_key
                .parse()
                .map_err(|_| UpstreamError::Connect("invalid subscription key header".into()))?,
        );
        headers.insert(
            "X-ConnectionId",
            connection_id
                .parse()
                .expect("uuid is a valid header value"),
        );

        let (socket, _response) = connect_async(request).await.map_err(map_dial_error)?;
        let (sink, source) = socket.split();

        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(UPSTREAM_EVENT_CAPACITY);

        let connection = Arc::new(Self {
            writer: tokio::sync::Mutex::new(sink),
            closed: AtomicBool::new(false),
            cancel: cancel.clone(),
            connection_id,
        });

        tokio::spawn(read_loop(
            source,
            event_tx,
            cancel,
            connection.connection_id.clone(),
        ));

        log::info!(
            "[Upstream] Connected to {} ({})",
            settings.url(),
            connection.connection_id
        );
        Ok((connection, event_rx))
    }

    /// Sends the configuration envelope.
    pub async fn send_speech_config(
        &self,
        config: &SpeechConfig,
        request_id: &str,
    ) -> Result<(), UpstreamError> {
        let frame = codec::speech_config_frame(config, request_id);
        self.send_text(frame).await
    }

    /// Sends one audio chunk: the `Path: audio` text frame followed by the
    /// binary frame, with no interleaved writes.
    pub async fn send_audio_chunk(
        &self,
        request_id: &str,
        chunk: &Bytes,
    ) -> Result<(), UpstreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(UpstreamError::Closed);
        }
        let header = codec::audio_frame_header(request_id);
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(header))
            .await
            .map_err(map_transport_error)?;
        writer
            .send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(map_transport_error)
    }

    async fn send_text(&self, frame: String) -> Result<(), UpstreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(UpstreamError::Closed);
        }
        self.writer
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(map_transport_error)
    }

    /// Closes the connection. Idempotent; subsequent writes fail with
    /// [`UpstreamError::Closed`] and the reader task exits.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            log::debug!(
                "[Upstream] Close frame not delivered ({}): {}",
                self.connection_id,
                e
            );
        }
        log::info!("[Upstream] Connection closed ({})", self.connection_id);
    }

    /// Whether the connection has been closed locally.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn map_dial_error(err: tungstenite::Error) -> UpstreamError {
    match err {
        tungstenite::Error::Http(response) => UpstreamError::Handshake {
            status: response.status().as_u16(),
        },
        other => UpstreamError::Connect(other.to_string()),
    }
}

fn map_transport_error(err: tungstenite::Error) -> UpstreamError {
    UpstreamError::Transport(err.to_string())
}

/// Dedicated reader: decodes inbound frames and emits typed events until
/// the socket closes or the connection is cancelled.
async fn read_loop(
    mut source: WsSource,
    events: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
    connection_id: String,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = events.send(UpstreamEvent::Disconnected(None)).await;
                break;
            }
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match codec::decode_text_frame(&text) {
                Ok(Some(event)) => {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[Upstream] Undecodable frame ({connection_id}): {e}");
                }
            },
            Some(Ok(Message::Binary(data))) => {
                log::debug!(
                    "[Upstream] Ignoring {} binary bytes ({connection_id})",
                    data.len()
                );
            }
            Some(Ok(Message::Close(_))) | None => {
                let _ = events.send(UpstreamEvent::Disconnected(None)).await;
                break;
            }
            Some(Ok(_)) => {} // ping/pong
            Some(Err(e)) => {
                let details = CancellationDetails::from_error(
                    CancellationErrorCode::ConnectionFailure,
                    format!("upstream read failed: {e}"),
                );
                let _ = events
                    .send(UpstreamEvent::Disconnected(Some(details)))
                    .await;
                break;
            }
        }
    }
    log::debug!("[Upstream] Reader exited ({connection_id})");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_build_regional_url() {
        let settings = UpstreamSettings {
            region: "japaneast".into(),
            endpoint: None,
            credentials: UpstreamCredentials {
                subscription_key: "key".into(),
                bearer_token: None,
            },
        };
        assert_eq!(
            settings.url(),
            "wss://japaneast.stt.speech.microsoft.com/speech/universal/v2"
        );
    }

    #[test]
    fn endpoint_override_wins_over_region() {
        let settings = UpstreamSettings {
            region: "japaneast".into(),
            endpoint: Some("wss://private.example.net/speech/universal/v2".into()),
            credentials: UpstreamCredentials {
                subscription_key: "key".into(),
                bearer_token: None,
            },
        };
        assert_eq!(
            settings.url(),
            "wss://private.example.net/speech/universal/v2"
        );
    }

    #[test]
    fn handshake_401_maps_to_auth_failure() {
        let err = UpstreamError::Handshake { status: 401 };
        let details = err.to_cancellation();
        assert_eq!(details.error_code, CancellationErrorCode::AuthFailure);
        assert!(details.error_details.contains("401"));
    }

    #[test]
    fn handshake_500_range_echoes_status() {
        let err = UpstreamError::Handshake { status: 503 };
        let details = err.to_cancellation();
        assert_eq!(
            details.error_code,
            CancellationErrorCode::ServiceUnavailable
        );
        assert!(details.error_details.contains("503"));
    }

    #[test]
    fn transport_errors_map_to_connection_failure() {
        let err = UpstreamError::Transport("reset by peer".into());
        assert_eq!(
            err.to_cancellation().error_code,
            CancellationErrorCode::ConnectionFailure
        );
    }
}
