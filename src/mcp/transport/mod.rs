//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all MCP transport
//! implementations must satisfy. Concrete implementations live in
//! submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`http::HttpTransport`] -- Streamable HTTP transport (POST per message,
//!   JSON or SSE response bodies).
//! - [`sse::SseTransport`] -- legacy HTTP+SSE transport (long-lived GET
//!   stream plus a POST endpoint announced by the server).
//! - [`websocket::WebSocketTransport`] -- one JSON-RPC message per text
//!   frame over a WebSocket.
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! Callers `send` a serialized JSON-RPC string and `receive` a stream of
//! serialized JSON-RPC strings (one per logical message). Framing, session
//! management and teardown belong to each concrete implementation.

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

/// Abstraction over MCP transport implementations.
///
/// All methods are `async` or return pinned [`Stream`]s so that transport
/// implementations can drive I/O without blocking the Tokio executor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The transport is responsible for any framing required by the
    /// underlying medium (a trailing newline for stdio, an HTTP POST for the
    /// HTTP transports, a text frame for WebSocket).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatError::McpTransport`] if the underlying
    /// I/O operation fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// The stream ends when the transport is closed or the remote peer
    /// disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Record the protocol revision negotiated during `initialize`.
    ///
    /// Only the Streamable HTTP transport uses this (it must echo the
    /// version in a header on every later request).
    async fn set_protocol_version(&self, _version: &str) {}
}

/// Turn a shared receiver into the stream returned by [`Transport::receive`].
pub(crate) fn receiver_stream(
    rx: std::sync::Arc<tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let mut guard = rx.lock().await;
        let item = guard.recv().await?;
        drop(guard);
        Some((item, rx))
    }))
}

pub mod event_stream;
pub mod http;
pub mod sse;
pub mod stdio;
pub mod websocket;

#[cfg(test)]
pub mod fake;
