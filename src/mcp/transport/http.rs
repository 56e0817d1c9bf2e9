//! Streamable HTTP transport for MCP
//!
//! This module implements [`HttpTransport`]. Every outbound JSON-RPC message
//! is sent as an HTTP POST. The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE stream carrying one or more JSON-RPC
//!   messages
//! - `202 Accepted` -- an acknowledgement with no body (used for
//!   notifications and responses)
//!
//! # Session management
//!
//! The server MAY return an `MCP-Session-Id` response header (typically on
//! the `initialize` response). The value is attached to every subsequent
//! request. If the server returns `404` while a session is active the
//! session is cleared and `ChatError::Mcp("mcp session expired")` is
//! returned.
//!
//! # Protocol version header
//!
//! Once the session layer has negotiated a revision it calls
//! [`Transport::set_protocol_version`]; from then on every POST carries
//! `MCP-Protocol-Version: <revision>`.
//!
//! # Drop behaviour
//!
//! When the transport is dropped and a session ID is active, an HTTP
//! DELETE is issued to the endpoint with the `MCP-Session-Id` header.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{ChatError, Result};
use crate::mcp::transport::event_stream::drive_sse_stream;
use crate::mcp::transport::{receiver_stream, Transport};

/// Streamable HTTP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use mcp_chat::mcp::transport::http::HttpTransport;
///
/// # fn main() -> anyhow::Result<()> {
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp")?,
///     HashMap::new(),
///     Duration::from_secs(30),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    /// Underlying reqwest HTTP client.
    http_client: reqwest::Client,
    /// MCP endpoint URL (POST target).
    endpoint: url::Url,
    /// Active session ID, populated from the first response that sets it.
    session_id: Arc<RwLock<Option<String>>>,
    /// Negotiated protocol revision; the header is omitted until set.
    protocol_version: RwLock<Option<String>>,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    /// Sender for inbound JSON-RPC message strings.
    response_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver exposed via `receive()`.
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl HttpTransport {
    /// Construct a new [`HttpTransport`] targeting `endpoint`.
    ///
    /// No network I/O is performed at construction time.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The MCP server URL (e.g. `http://host/mcp`).
    /// * `headers` - Extra headers added to every request.
    /// * `connect_timeout` - Limit for establishing the TCP/TLS connection.
    ///   Response deadlines belong to the JSON-RPC layer, since a
    ///   `tools/call` may legitimately run for minutes.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpTransport`] if the HTTP client cannot be
    /// built (TLS initialisation failure).
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ChatError::McpTransport(format!("failed to build HTTP client: {}", e)))?;

        let (response_tx, response_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            protocol_version: RwLock::new(None),
            headers,
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
        })
    }

    /// Current session ID, if the server assigned one.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// Send a JSON-RPC message via HTTP POST to the MCP endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpAuth`] on `401`, [`ChatError::Mcp`] when an
    /// active session has expired (`404`), and [`ChatError::McpTransport`]
    /// for any other failure.
    async fn send(&self, message: String) -> Result<()> {
        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message);

        if let Some(ref version) = *self.protocol_version.read().await {
            req = req.header("MCP-Protocol-Version", version.as_str());
        }
        if let Some(ref id) = *self.session_id.read().await {
            req = req.header("MCP-Session-Id", id.as_str());
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| ChatError::McpTransport(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_auth = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unauthorized")
                .to_string();
            return Err(ChatError::McpAuth(www_auth).into());
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let mut sid = self.session_id.write().await;
            if sid.take().is_some() {
                return Err(ChatError::Mcp("mcp session expired".into()).into());
            }
            return Err(ChatError::McpTransport("HTTP 404 Not Found".into()).into());
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::McpTransport(format!(
                "HTTP POST returned status {}: {}",
                status,
                body.trim()
            ))
            .into());
        }

        if let Some(new_session_id) = response
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let response_tx = self.response_tx.clone();
            tokio::spawn(async move {
                drive_sse_stream(byte_stream, |event| {
                    if event.is_message() {
                        return response_tx.send(event.data).is_ok();
                    }
                    true
                })
                .await;
            });
        } else {
            let body = response.text().await.map_err(|e| {
                ChatError::McpTransport(format!("failed to read response body: {}", e))
            })?;
            let body = body.trim();
            if !body.is_empty() {
                let _ = self.response_tx.send(body.to_string());
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.response_rx))
    }

    async fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.write().await = Some(version.to_string());
    }
}

impl Drop for HttpTransport {
    /// Terminate the MCP session with a DELETE.
    ///
    /// Runs on a separate thread with a blocking client so the async runtime
    /// is never blocked; failures are ignored.
    fn drop(&mut self) {
        let session_id = match self.session_id.try_read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };

        if let Some(sid) = session_id {
            let endpoint = self.endpoint.as_str().to_string();
            let mut extra_headers = self.headers.clone();
            extra_headers.insert("MCP-Session-Id".to_string(), sid);

            let _ = std::thread::spawn(move || {
                if let Ok(client) = reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                {
                    let mut req = client.delete(&endpoint);
                    for (k, v) in &extra_headers {
                        req = req.header(k.as_str(), v.as_str());
                    }
                    let _ = req.send();
                }
            });
        }
    }
}
