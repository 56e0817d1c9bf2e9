//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] is a channel-backed JSON-RPC 2.0 client that knows
//! nothing about the underlying transport. Callers wire up two
//! [`tokio::sync::mpsc`] channels (one for outbound serialized messages, one
//! for inbound serialized messages) and then call [`start_read_loop`] to
//! process responses and notifications concurrently.
//!
//! - Outbound messages are written to `outbound_tx` as newline-free JSON
//!   strings. Framing is the transport's job.
//! - Inbound messages are classified as a response, a server-initiated
//!   request, or a notification. Server `ping` requests are answered here;
//!   any other server request gets `-32601 Method not found`.
//! - In-flight requests are tracked in a `pending` map keyed by `u64` request
//!   ID. When the read loop stops, every pending request fails immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};
use crate::mcp::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ERROR_INTERNAL, ERROR_METHOD_NOT_FOUND,
    METHOD_PING,
};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A notification handler: called with the raw `params` value when a matching
/// server notification arrives.
type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Transport-agnostic async JSON-RPC 2.0 client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use mcp_chat::mcp::client::{JsonRpcClient, start_read_loop};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let token = CancellationToken::new();
///     let client = Arc::new(JsonRpcClient::new("filesystem", out_tx));
///     let _handle = start_read_loop(in_rx, token, Arc::clone(&client));
///     Ok(())
/// }
/// ```
pub struct JsonRpcClient {
    /// Server name, used in timeout errors and log lines.
    server: Arc<str>,
    /// Monotonically increasing request ID counter.
    next_id: Arc<AtomicU64>,
    /// In-flight requests waiting for a response.
    pending: Arc<Mutex<PendingMap>>,
    /// Channel used to send serialized JSON-RPC messages to the transport.
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Registered handlers for server-sent notifications (method -> handler).
    notification_handlers: Arc<Mutex<HashMap<String, NotificationHandler>>>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server", &self.server)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a new `JsonRpcClient`.
    ///
    /// The caller is responsible for wiring the outbound receiver to a
    /// transport writer and calling [`start_read_loop`] with the matching
    /// inbound receiver.
    ///
    /// # Arguments
    ///
    /// * `server` - Name of the server this client talks to.
    /// * `outbound_tx` - Sender half of the outbound message channel.
    pub fn new(server: impl Into<String>, outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        let server: String = server.into();
        Self {
            server: Arc::from(server),
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            notification_handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a client sharing all internal state with `self`.
    ///
    /// The read loop holds an `Arc<JsonRpcClient>` while the protocol layer
    /// owns a `JsonRpcClient` by value; both must see the same pending map.
    pub fn clone_shared(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            next_id: Arc::clone(&self.next_id),
            pending: Arc::clone(&self.pending),
            outbound_tx: self.outbound_tx.clone(),
            notification_handlers: Arc::clone(&self.notification_handlers),
        }
    }

    /// Name of the server this client talks to
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name.
    /// * `params` - Parameters for the `params` field; `null` omits the field.
    /// * `timeout` - Optional timeout; defaults to [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpTransport`] if the outbound channel is closed
    /// or the read loop exits first, [`ChatError::McpTimeout`] if no response
    /// arrives in time, [`ChatError::Mcp`] if the server returns an error
    /// response, and [`ChatError::Serialization`] on (de)serialization
    /// failures.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so a fast response always finds its slot.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let _slot = PendingSlot {
            id,
            pending: Arc::clone(&self.pending),
        };

        let params = serde_json::to_value(params)?;
        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: (!params.is_null()).then_some(params),
        })?;

        tracing::trace!(server = %self.server, "MCP -> {}", message);

        if self.outbound_tx.send(message).is_err() {
            return Err(ChatError::McpTransport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(ChatError::McpTimeout {
                    server: self.server.to_string(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            ChatError::McpTransport(format!(
                "connection to \"{}\" closed before a response to {} arrived",
                self.server, method
            ))
        })?;

        let value = rpc_result.map_err(|e| ChatError::Mcp(e.to_string()))?;

        serde_json::from_value(value).map_err(|e| ChatError::Serialization(e).into())
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpTransport`] if the outbound channel is closed.
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?
        }))?;

        self.outbound_tx
            .send(message)
            .map_err(|_| ChatError::McpTransport("outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Register a handler for a server-sent notification.
    ///
    /// Registering a second handler for the same method replaces the first.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .lock()
            .await
            .insert(method.into(), Box::new(f));
    }

    /// Number of requests still waiting for a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn send_response(&self, response: JsonRpcResponse) {
        match serde_json::to_string(&response) {
            Ok(serialized) => {
                let _ = self.outbound_tx.send(serialized);
            }
            Err(e) => tracing::warn!(server = %self.server, "Failed to serialize response: {e}"),
        }
    }
}

/// Removes a request's `pending` entry however the request ends, including
/// when its future is dropped mid-flight.
struct PendingSlot {
    id: u64,
    pending: Arc<Mutex<PendingMap>>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&self.id);
            return;
        }
        // Contended: finish the cleanup asynchronously.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pending = Arc::clone(&self.pending);
            let id = self.id;
            handle.spawn(async move {
                pending.lock().await.remove(&id);
            });
        }
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// The loop ends when `cancellation` fires or the inbound channel closes. In
/// both cases every pending sender is dropped so in-flight `request()` calls
/// fail instead of waiting for their timeout.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                maybe_msg = inbound_rx.recv() => {
                    match maybe_msg {
                        Some(raw) => dispatch_message(&raw, &client).await,
                        None => {
                            tracing::debug!(server = %client.server, "MCP inbound stream closed");
                            break;
                        }
                    }
                }
            }
        }
        client.pending.lock().await.clear();
    })
}

/// Classify and dispatch a single inbound JSON string.
async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    tracing::trace!(server = %client.server, "MCP <- {}", raw);

    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(server = %client.server, "Ignoring unparsable MCP message: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client);
    } else if has_method {
        handle_notification(value, client).await;
    } else if has_error {
        // Error without an id: the server could not parse something we sent.
        tracing::warn!(server = %client.server, "MCP server reported an error: {}", value["error"]);
    } else {
        tracing::debug!(server = %client.server, "Ignoring unclassifiable MCP message");
    }
}

/// Resolve a pending request sender with the response value or error.
async fn handle_response(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()))
    {
        Some(id) => id,
        None => {
            tracing::warn!(server = %client.server, "MCP response has non-integer id: {id_val}");
            return;
        }
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!(server = %client.server, "MCP response for unknown id {id}; ignoring");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: ERROR_INTERNAL,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    // The caller may have already timed out.
    let _ = tx.send(outcome);
}

/// Answer a server-initiated request.
fn handle_server_request(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let method = value
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    let id = value.get("id").cloned();

    let response = if method == METHOD_PING {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(serde_json::json!({})),
            error: None,
        }
    } else {
        tracing::debug!(server = %client.server, "Rejecting unsupported server request '{method}'");
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: ERROR_METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    };

    client.send_response(response);
}

/// Call the registered notification handler.
async fn handle_notification(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let handlers = client.notification_handlers.lock().await;
    match handlers.get(method) {
        Some(handler) => handler(params),
        None => tracing::debug!(server = %client.server, "No handler for notification '{method}'"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Build an in-process client with both channel ends exposed.
    fn make_client() -> (
        Arc<JsonRpcClient>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
        CancellationToken,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let token = CancellationToken::new();
        let client = Arc::new(JsonRpcClient::new("test-server", out_tx));
        start_read_loop(in_rx, token.clone(), Arc::clone(&client));
        (client, out_rx, in_tx, token)
    }

    /// Reply to the next outbound request with `reply(id)`.
    fn answer_next(
        mut out_rx: mpsc::UnboundedReceiver<String>,
        in_tx: mpsc::UnboundedSender<String>,
        reply: impl FnOnce(serde_json::Value) -> serde_json::Value + Send + 'static,
    ) {
        tokio::spawn(async move {
            let sent = out_rx.recv().await.unwrap();
            let req: serde_json::Value = serde_json::from_str(&sent).unwrap();
            let response = reply(req["id"].clone());
            in_tx.send(response.to_string()).unwrap();
        });
    }

    #[tokio::test]
    async fn test_request_resolves_with_correct_result() {
        let (client, out_rx, in_tx, _token) = make_client();
        answer_next(out_rx, in_tx, |id| {
            serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": [] } })
        });

        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct ToolsListResult {
            tools: Vec<serde_json::Value>,
        }

        let result: ToolsListResult = client
            .request("tools/list", serde_json::json!({}), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(result.tools.is_empty());
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_null_params_are_omitted() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let client = JsonRpcClient::new("s", out_tx);

        let _ = client
            .request::<_, serde_json::Value>("ping", (), Some(Duration::from_millis(10)))
            .await;

        let raw = out_rx.recv().await.unwrap();
        let val: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(val["method"], "ping");
        assert!(val.get("params").is_none());
    }

    #[tokio::test]
    async fn test_request_timeout_names_server_and_method() {
        let (client, _out_rx, _in_tx, _token) = make_client();

        let err = client
            .request::<_, serde_json::Value>(
                "tools/list",
                serde_json::json!({}),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        match err.downcast_ref::<ChatError>() {
            Some(ChatError::McpTimeout { server, method }) => {
                assert_eq!(server, "test-server");
                assert_eq!(method, "tools/list");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_abandoned_request_releases_pending_slot() {
        let (client, _out_rx, _in_tx, _token) = make_client();

        // An outer deadline, like the agent's, cancels the request future.
        let outer = tokio::time::timeout(
            Duration::from_millis(50),
            client.request::<_, serde_json::Value>(
                "tools/call",
                serde_json::json!({ "name": "slow" }),
                Some(Duration::from_secs(300)),
            ),
        )
        .await;

        assert!(outer.is_err());
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_notification_handler_called_for_matching_method() {
        let (client, _out_rx, in_tx, _token) = make_client();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        client
            .on_notification("notifications/tools/list_changed", move |_params| {
                counter_clone.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .await;

        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/list_changed"
        });
        in_tx.send(notif.to_string()).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let (_client, mut out_rx, in_tx, _token) = make_client();

        in_tx
            .send(serde_json::json!({ "jsonrpc": "2.0", "id": "srv-1", "method": "ping" }).to_string())
            .unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let val: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(val["id"], "srv-1");
        assert_eq!(val["result"], serde_json::json!({}));
        assert!(val.get("error").is_none());
    }

    #[tokio::test]
    async fn test_unknown_server_request_gets_method_not_found() {
        let (_client, mut out_rx, in_tx, _token) = make_client();

        in_tx
            .send(
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": 7,
                    "method": "sampling/createMessage",
                    "params": {}
                })
                .to_string(),
            )
            .unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let val: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(val["id"], 7);
        assert_eq!(val["error"]["code"], ERROR_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pending_request_fails_on_read_loop_exit() {
        let (client, _out_rx, _in_tx, token) = make_client();

        let client_clone = Arc::clone(&client);
        let request_task = tokio::spawn(async move {
            client_clone
                .request::<_, serde_json::Value>(
                    "tools/list",
                    serde_json::json!({}),
                    Some(Duration::from_secs(10)),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), request_task)
            .await
            .expect("request task did not complete after loop exit")
            .expect("task panicked");

        let err = outcome.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::McpTransport(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_request_fails_when_inbound_closes() {
        let (client, _out_rx, in_tx, _token) = make_client();

        let client_clone = Arc::clone(&client);
        let request_task = tokio::spawn(async move {
            client_clone
                .request::<_, serde_json::Value>("ping", (), Some(Duration::from_secs(10)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(in_tx);

        let outcome = tokio::time::timeout(Duration::from_secs(2), request_task)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_json_rpc_error_response_mapped_to_mcp_error() {
        let (client, out_rx, in_tx, _token) = make_client();
        answer_next(out_rx, in_tx, |id| {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32602, "message": "Unknown tool: nope" }
            })
        });

        let err = client
            .request::<_, serde_json::Value>(
                "tools/call",
                serde_json::json!({ "name": "nope" }),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();

        let s = err.to_string();
        assert!(s.contains("-32602"), "unexpected error string: {s}");
        assert!(s.contains("Unknown tool: nope"), "unexpected error string: {s}");
    }

    #[tokio::test]
    async fn test_string_ids_are_accepted() {
        let (client, out_rx, in_tx, _token) = make_client();
        answer_next(out_rx, in_tx, |id| {
            let as_string = id.as_u64().unwrap().to_string();
            serde_json::json!({ "jsonrpc": "2.0", "id": as_string, "result": { "ok": true } })
        });

        let value: serde_json::Value = client
            .request("ping", (), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_notify_sends_without_id() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let client = JsonRpcClient::new("s", out_tx);

        client
            .notify("notifications/initialized", serde_json::json!({}))
            .unwrap();

        let raw = out_rx.recv().await.unwrap();
        let val: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(val["method"], "notifications/initialized");
        assert!(val.get("id").is_none(), "notifications must not have an id");
    }

    #[tokio::test]
    async fn test_multiple_concurrent_requests_resolved_correctly() {
        let (client, mut out_rx, in_tx, _token) = make_client();

        tokio::spawn(async move {
            while let Some(raw) = out_rx.recv().await {
                let req: serde_json::Value = serde_json::from_str(&raw).unwrap();
                if let Some(id) = req.get("id") {
                    let resp = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "echo": id }
                    });
                    in_tx.send(resp.to_string()).unwrap();
                }
            }
        });

        let timeout = Some(Duration::from_secs(5));
        let (r1, r2, r3) = tokio::join!(
            client.request::<_, serde_json::Value>("ping", (), timeout),
            client.request::<_, serde_json::Value>("ping", (), timeout),
            client.request::<_, serde_json::Value>("ping", (), timeout),
        );

        let ids: std::collections::HashSet<u64> = [r1.unwrap(), r2.unwrap(), r3.unwrap()]
            .into_iter()
            .map(|v| v["echo"].as_u64().unwrap())
            .collect();
        assert_eq!(ids.len(), 3, "each request should have a unique ID");
    }

    #[test]
    fn test_notify_returns_error_when_channel_closed() {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        drop(out_rx);
        let client = JsonRpcClient::new("s", out_tx);
        assert!(client.notify("test", serde_json::json!({})).is_err());
    }
}
