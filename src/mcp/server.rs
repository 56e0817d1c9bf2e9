//! One live MCP server session
//!
//! [`McpServer::start`] turns a configured server into a running session:
//! it builds the transport, bridges it to a [`JsonRpcClient`] through two
//! channels, performs the handshake, and fetches the tool list. Failures
//! are reported once, tagged with the server name, and never retried.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{McpServerConfig, ServerTransport};
use crate::error::{ChatError, Result};
use crate::mcp::client::{start_read_loop, JsonRpcClient, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::sse::SseTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::websocket::WebSocketTransport;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolResponse, ClientCapabilities, Implementation, McpTool, NOTIF_MESSAGE,
    NOTIF_TOOLS_LIST_CHANGED,
};

/// Upper bound for a single `tools/call`.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Name this client reports in `initialize`.
pub const CLIENT_NAME: &str = "mcp-chat";

/// Path of the stderr log for the local server `name`.
pub fn log_file_path(log_dir: &Path, name: &str) -> PathBuf {
    log_dir.join(format!("mcp-server-{}.log", name))
}

/// A connected, initialized MCP server.
pub struct McpServer {
    name: String,
    session: InitializedMcpProtocol,
    tools: Vec<McpTool>,
    /// `None` once the session has been shut down.
    transport: StdMutex<Option<Arc<dyn Transport>>>,
    cancel: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .field("open", &self.is_open())
            .finish()
    }
}

impl McpServer {
    /// Launch or connect to `config` and complete the MCP handshake.
    ///
    /// Local servers get their stderr written to
    /// `{log_dir}/mcp-server-{name}.log`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpServer`] naming the server when the
    /// descriptor is invalid, the transport cannot be established, or the
    /// handshake or tool listing fails.
    pub async fn start(name: &str, config: &McpServerConfig, log_dir: &Path) -> Result<Self> {
        let result: Result<Self> = async {
            let transport = config
                .transport()
                .map_err(|message| ChatError::McpServer {
                    server: name.to_string(),
                    message,
                })?;
            tracing::info!("MCP server \"{}\": initializing with: {}", name, transport);

            let transport = connect_transport(name, &transport, log_dir).await?;
            Self::from_transport(name, transport).await
        }
        .await;

        result.map_err(|e| -> anyhow::Error {
            tracing::error!("MCP server \"{}\": failed to start: {:#}", name, e);
            match e.downcast::<ChatError>() {
                Ok(server_err @ ChatError::McpServer { .. }) => server_err.into(),
                Ok(other) => ChatError::McpServer {
                    server: name.to_string(),
                    message: other.to_string(),
                }
                .into(),
                Err(other) => ChatError::McpServer {
                    server: name.to_string(),
                    message: format!("{:#}", other),
                }
                .into(),
            }
        })
    }

    /// Run the session over an already established transport.
    ///
    /// # Errors
    ///
    /// Returns the first handshake or `tools/list` error. The transport is
    /// released before returning.
    pub async fn from_transport(name: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let send_error: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));

        let writer = {
            let transport = Arc::clone(&transport);
            let cancel = cancel.clone();
            let send_error = Arc::clone(&send_error);
            let server = name.to_string();
            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    if let Err(e) = transport.send(message).await {
                        tracing::warn!("MCP server \"{}\": send failed: {:#}", server, e);
                        if let Ok(mut slot) = send_error.lock() {
                            *slot = Some(format!("{:#}", e));
                        }
                        // Fail in-flight requests now instead of at their timeout.
                        cancel.cancel();
                        break;
                    }
                }
            })
        };

        let reader = {
            let transport = Arc::clone(&transport);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut stream = transport.receive();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = stream.next() => match next {
                            Some(message) => {
                                if inbound_tx.send(message).is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            })
        };

        let client = Arc::new(JsonRpcClient::new(name, outbound_tx));
        let read_loop = start_read_loop(inbound_rx, cancel.clone(), Arc::clone(&client));
        register_notification_handlers(name, &client).await;

        let mut tasks = vec![writer, reader, read_loop];

        let (session, tools) = match handshake(client.clone_shared(), transport.as_ref()).await {
            Ok(connected) => connected,
            Err(e) => {
                let cause = send_error.lock().ok().and_then(|slot| slot.clone());
                cancel.cancel();
                for task in tasks.drain(..) {
                    task.abort();
                    let _ = task.await;
                }
                drop(transport);
                return Err(match cause {
                    Some(cause) => ChatError::McpTransport(cause).into(),
                    None => e,
                });
            }
        };

        let server = Self {
            name: name.to_string(),
            session,
            tools,
            transport: StdMutex::new(Some(transport)),
            cancel,
            tasks: StdMutex::new(tasks),
        };

        tracing::info!("MCP server \"{}\": connected", name);
        tracing::info!(
            "MCP server \"{}\": {} tool(s) available:",
            name,
            server.tools.len()
        );
        for tool in &server.tools {
            tracing::info!("- {}", tool.name);
        }

        Ok(server)
    }

    /// Server name from the configuration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools advertised by the server at connect time
    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    /// Information the server reported about itself
    pub fn server_info(&self) -> &Implementation {
        &self.session.initialize_response.server_info
    }

    /// Whether the session is still open
    pub fn is_open(&self) -> bool {
        self.transport
            .lock()
            .map(|transport| transport.is_some())
            .unwrap_or(false)
    }

    /// Call a tool on this server.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed, the request times out, or
    /// the server answers with a JSON-RPC error.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        if !self.is_open() {
            return Err(ChatError::McpServer {
                server: self.name.clone(),
                message: "session is closed".to_string(),
            }
            .into());
        }
        self.session
            .call_tool(tool, arguments, Some(TOOL_CALL_TIMEOUT))
            .await
    }

    /// Liveness check
    pub async fn ping(&self) -> Result<()> {
        self.session.ping().await
    }

    /// Close the session: stop the I/O tasks and release the transport,
    /// which terminates a local server process or ends a remote session.
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        let Some(transport) = self.transport.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        // Last reference: dropping it kills the child or ends the remote session.
        drop(transport);
        tracing::info!("MCP server \"{}\": session closed", self.name);
    }
}

impl Drop for McpServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Ok(tasks) = self.tasks.lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }
}

/// Build the transport described by `transport`.
async fn connect_transport(
    name: &str,
    transport: &ServerTransport,
    log_dir: &Path,
) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match transport {
        ServerTransport::Stdio {
            command,
            args,
            env,
            cwd,
        } => Arc::new(StdioTransport::spawn(
            command,
            args,
            env,
            cwd.as_deref(),
            Some(log_file_path(log_dir, name)),
        )?),
        ServerTransport::StreamableHttp { url, headers } => Arc::new(HttpTransport::new(
            url.clone(),
            headers.clone(),
            DEFAULT_REQUEST_TIMEOUT,
        )?),
        ServerTransport::Sse { url, headers } => Arc::new(
            SseTransport::connect(url.clone(), headers.clone(), DEFAULT_REQUEST_TIMEOUT).await?,
        ),
        ServerTransport::WebSocket { url, headers } => Arc::new(
            WebSocketTransport::connect(url.clone(), headers, DEFAULT_REQUEST_TIMEOUT).await?,
        ),
    };
    Ok(transport)
}

async fn handshake(
    client: JsonRpcClient,
    transport: &dyn Transport,
) -> Result<(InitializedMcpProtocol, Vec<McpTool>)> {
    let client_info = Implementation {
        name: CLIENT_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        title: None,
    };
    let session = McpProtocol::new(client)
        .initialize(client_info, ClientCapabilities::default(), None)
        .await?;
    transport
        .set_protocol_version(session.protocol_version())
        .await;

    let tools = if session.has_tools() {
        session.list_tools().await?
    } else {
        tracing::debug!(
            "MCP server \"{}\" does not advertise tools",
            session.client.server()
        );
        Vec::new()
    };
    Ok((session, tools))
}

async fn register_notification_handlers(name: &str, client: &JsonRpcClient) {
    let server = name.to_string();
    client
        .on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_| {
            tracing::warn!(
                "MCP server \"{}\": tool list changed; restart to pick up the new tools",
                server
            );
        })
        .await;

    let server = name.to_string();
    client
        .on_notification(NOTIF_MESSAGE, move |params| {
            let data = params.get("data").cloned().unwrap_or(params);
            tracing::debug!("MCP server \"{}\" log: {}", server, data);
        })
        .await;
}
