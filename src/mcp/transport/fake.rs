//! In-process fake transport for MCP tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the code under test; from the test side
//! use the handle to:
//!
//! - read what the client sent: `handle.outbound_rx.recv().await`
//! - inject server messages: `handle.inbound_tx.send(json_string)`
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -----------------> inbound_rx  (client receive())
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{ChatError, Result};
use crate::mcp::transport::{receiver_stream, Transport};

/// In-process fake transport for use in tests.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Last value passed to `set_protocol_version`.
    protocol_version: Arc<std::sync::Mutex<Option<String>>>,
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Receives messages that the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Sends server messages into the client's [`Transport::receive`] stream.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// Protocol revision the client recorded on the transport.
    pub protocol_version: Arc<std::sync::Mutex<Option<String>>>,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let protocol_version = Arc::new(std::sync::Mutex::new(None));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            protocol_version: Arc::clone(&protocol_version),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            protocol_version,
        };

        (transport, handle)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx.send(message).map_err(|e| {
            ChatError::McpTransport(format!("FakeTransport outbound channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.inbound_rx))
    }

    async fn set_protocol_version(&self, version: &str) {
        if let Ok(mut guard) = self.protocol_version.lock() {
            *guard = Some(version.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_delivers_to_handle_outbound_rx() {
        let (transport, mut handle) = FakeTransport::new();

        transport
            .send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(received, r#"{"jsonrpc":"2.0","method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_receive_multiple_messages_ordered() {
        let (transport, handle) = FakeTransport::new();

        for i in 0u32..3 {
            handle.inbound_tx.send(format!("resp-{}", i)).unwrap();
        }

        let mut stream = transport.receive();
        for i in 0u32..3 {
            let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("timed out")
                .expect("stream ended");
            assert_eq!(msg, format!("resp-{}", i));
        }
    }

    #[tokio::test]
    async fn test_send_returns_error_when_handle_dropped() {
        let (transport, handle) = FakeTransport::new();
        drop(handle);
        assert!(transport.send("test".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_protocol_version_visible_to_handle() {
        let (transport, handle) = FakeTransport::new();
        transport.set_protocol_version("2025-03-26").await;
        assert_eq!(
            handle.protocol_version.lock().unwrap().as_deref(),
            Some("2025-03-26")
        );
    }
}
