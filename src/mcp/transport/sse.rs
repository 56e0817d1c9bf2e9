//! Legacy HTTP+SSE transport for MCP (`2024-11-05` revision)
//!
//! The client opens a long-lived GET stream. The server's first event is
//! `endpoint`, whose data is the URL (often relative) that receives client
//! messages via POST. Every server-to-client message then arrives as a
//! `message` event on the GET stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{ChatError, Result};
use crate::mcp::transport::event_stream::drive_sse_stream;
use crate::mcp::transport::{receiver_stream, Transport};

/// Legacy SSE transport.
#[derive(Debug)]
pub struct SseTransport {
    http_client: reqwest::Client,
    /// POST target announced by the server's `endpoint` event.
    post_endpoint: url::Url,
    headers: HashMap<String, String>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Task reading the GET stream; aborted on drop.
    stream_task: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream at `url` and wait for the `endpoint` event.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpAuth`] on `401`, and
    /// [`ChatError::McpTransport`] if the stream cannot be opened, ends
    /// before announcing an endpoint, or the endpoint is not a valid URL.
    pub async fn connect(
        url: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        // The GET stream stays open for the whole session, so only the
        // connect phase is bounded.
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ChatError::McpTransport(format!("failed to build HTTP client: {}", e)))?;

        let mut req = http_client
            .get(url.as_str())
            .header("Accept", "text/event-stream");
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| ChatError::McpTransport(format!("SSE GET request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ChatError::McpAuth("SSE stream requires authorization".into()).into());
        }
        if !status.is_success() {
            return Err(
                ChatError::McpTransport(format!("SSE GET returned HTTP {}", status)).into(),
            );
        }

        let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let byte_stream = response.bytes_stream();

        let stream_task = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            drive_sse_stream(byte_stream, |event| match event.kind() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data.trim().to_string());
                    }
                    true
                }
                _ if event.is_message() => response_tx.send(event.data).is_ok(),
                _ => true,
            })
            .await;
        });

        let announced = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                stream_task.abort();
                return Err(ChatError::McpTransport(
                    "SSE stream closed before the endpoint event".into(),
                )
                .into());
            }
            Err(_) => {
                stream_task.abort();
                return Err(ChatError::McpTransport(
                    "timed out waiting for the SSE endpoint event".into(),
                )
                .into());
            }
        };

        let post_endpoint = match url.join(&announced) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                stream_task.abort();
                return Err(ChatError::McpTransport(format!(
                    "invalid SSE endpoint {:?}: {}",
                    announced, e
                ))
                .into());
            }
        };
        tracing::debug!("SSE message endpoint: {}", post_endpoint);

        Ok(Self {
            http_client,
            post_endpoint,
            headers,
            response_rx: Arc::new(Mutex::new(response_rx)),
            stream_task,
        })
    }

    /// URL that receives client messages
    pub fn post_endpoint(&self) -> &url::Url {
        &self.post_endpoint
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: String) -> Result<()> {
        let mut req = self
            .http_client
            .post(self.post_endpoint.as_str())
            .header("Content-Type", "application/json")
            .body(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| ChatError::McpTransport(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ChatError::McpAuth("SSE endpoint requires authorization".into()).into());
        }
        if !status.is_success() {
            return Err(ChatError::McpTransport(format!(
                "HTTP POST returned status {}",
                status
            ))
            .into());
        }
        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.response_rx))
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.stream_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt as _;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    #[tokio::test]
    async fn test_connect_resolves_relative_endpoint_and_posts_to_it() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(sse(
                "event: endpoint\ndata: /messages?sessionId=abc\n\n\
                 event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(query_param("sessionId", "abc"))
            .and(body_string_contains("\"method\":\"ping\""))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let url = url::Url::parse(&format!("{}/sse", server.uri())).unwrap();
        let transport = SseTransport::connect(url, HashMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(transport.post_endpoint().path(), "/messages");

        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.into())
            .await
            .unwrap();

        let mut stream = transport.receive();
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_stream_without_endpoint_event_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(sse("data: hello\n\n"))
            .mount(&server)
            .await;

        let url = url::Url::parse(&format!("{}/sse", server.uri())).unwrap();
        let err = SseTransport::connect(url, HashMap::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("endpoint"), "{err}");
    }

    #[tokio::test]
    async fn test_unauthorized_stream_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let url = url::Url::parse(&format!("{}/sse", server.uri())).unwrap();
        let err = SseTransport::connect(url, HashMap::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::McpAuth(_))
        ));
    }
}
