//! One request/response exchange with the gateway over WebSocket.
//!
//! There is exactly one call in flight per connection, so correlation needs
//! no request ids: every content frame received after the handshake belongs
//! to the request sent on that socket.
//!
//! ## Outcomes
//!
//! | Event | Result |
//! |-------|--------|
//! | `done`/`complete` frame | `Ok(buffer)` (or the frame's own text if nothing was buffered) |
//! | `error` frame | `Err(GatewayError::Remote)` |
//! | close / transport error with buffered content | `Ok(partial buffer)` |
//! | close / transport error with empty buffer | `Err(GatewayError::ConnectionClosed)` |
//! | wall-clock budget exceeded | `Err(GatewayError::Timeout)`; the socket is dropped |

use crate::protocol::{FrameKind, InboundFrame, OutboundFrame};
use crate::GatewayError;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Default wall-clock budget for a whole exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

const CLIENT_NAME: &str = concat!("edgequake-pdf2csv/", env!("CARGO_PKG_VERSION"));

/// Correlation state of one in-flight call.
#[derive(Debug)]
pub struct GatewaySession {
    token: String,
    ready: bool,
    buffer: String,
}

impl GatewaySession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ready: false,
            buffer: String::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the handshake has been acknowledged.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn push(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Resolve on a terminal frame.
    pub fn finish(self, final_text: Option<String>) -> String {
        if self.buffer.is_empty() {
            final_text.unwrap_or_default()
        } else {
            self.buffer
        }
    }

    /// Resolve when the socket went away without a terminal frame.
    ///
    /// Partial content counts as the response.
    pub fn close(self) -> Result<String, GatewayError> {
        if self.buffer.is_empty() {
            Err(GatewayError::ConnectionClosed)
        } else {
            warn!(
                "Gateway closed without a terminal frame; using {} buffered bytes",
                self.buffer.len()
            );
            Ok(self.buffer)
        }
    }
}

/// Client for the gateway WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct AgentClient {
    url: String,
    token: String,
    timeout: Duration,
}

impl AgentClient {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Wall-clock budget covering connect, handshake and the full response.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `message` to `agent_id` in `session_key` and wait for the reply.
    pub async fn send(
        &self,
        agent_id: &str,
        session_key: &str,
        message: &str,
    ) -> Result<String, GatewayError> {
        match tokio::time::timeout(self.timeout, self.exchange(agent_id, session_key, message))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Gateway call to {} timed out after {:?}",
                    self.url, self.timeout
                );
                Err(GatewayError::Timeout {
                    elapsed: self.timeout,
                })
            }
        }
    }

    async fn exchange(
        &self,
        agent_id: &str,
        session_key: &str,
        message: &str,
    ) -> Result<String, GatewayError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| GatewayError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        debug!("Connected to gateway at {}", self.url);

        let (mut sink, mut stream) = ws.split();
        let mut session = GatewaySession::new(self.token.clone());

        let connect = OutboundFrame::Connect {
            token: session.token(),
            client: CLIENT_NAME,
        }
        .to_json()?;
        sink.send(Message::Text(connect.into()))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        while let Some(next) = stream.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Gateway transport error: {}", e);
                    break;
                }
            };

            let text = match msg {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    debug!("Gateway sent close: {:?}", frame);
                    break;
                }
                _ => continue,
            };

            let frame: InboundFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Ignoring undecodable gateway frame: {}", e);
                    continue;
                }
            };

            match frame.classify() {
                FrameKind::Ack => {
                    if session.is_ready() {
                        continue;
                    }
                    session.mark_ready();
                    let request = OutboundFrame::Agent {
                        agent_id,
                        session_key,
                        message,
                    }
                    .to_json()?;
                    sink.send(Message::Text(request.into()))
                        .await
                        .map_err(|e| GatewayError::Transport(e.to_string()))?;
                    info!("Agent request sent to {} ({})", agent_id, session_key);
                }
                FrameKind::Content(fragment) => session.push(&fragment),
                FrameKind::Done(final_text) => {
                    let reply = session.finish(final_text);
                    debug!("Gateway call complete: {} bytes", reply.len());
                    return Ok(reply);
                }
                FrameKind::Error(message) => return Err(GatewayError::Remote(message)),
                FrameKind::Other(kind) => debug!("Ignoring gateway frame type '{}'", kind),
            }
        }

        session.close()
    }
}
