//! WebSocket transport for MCP
//!
//! Connects with the `mcp` subprotocol and exchanges one JSON-RPC message per
//! text frame. Configured headers are attached to the upgrade request.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ChatError, Result};
use crate::mcp::transport::{receiver_stream, Transport};

/// Subprotocol requested during the upgrade.
pub const MCP_SUBPROTOCOL: &str = "mcp";

/// WebSocket transport.
#[derive(Debug)]
pub struct WebSocketTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    reader: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpTransport`] if a header is malformed, the
    /// handshake fails, or it does not finish within `timeout`.
    pub async fn connect(
        url: url::Url,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(MCP_SUBPROTOCOL),
        );
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| ChatError::McpTransport(format!("invalid header name {}: {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| ChatError::McpTransport(format!("invalid value for header {}: {}", k, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| ChatError::McpTransport("WebSocket handshake timed out".into()))?
                .map_err(|e| ChatError::McpTransport(format!("WebSocket connect failed: {}", e)))?;

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        // Ends with a close frame once the transport (and its sender) is dropped.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(message)).await {
                    tracing::debug!("WebSocket send failed: {}", e);
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!("WebSocket read failed: {}", e);
                        break;
                    }
                };
                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            reader,
        })
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx
            .send(message)
            .map_err(|_| ChatError::McpTransport("WebSocket connection closed".into()).into())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.inbound_rx))
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
