// SPDX-License-Identifier: MIT
//! Delivery bridge between the host shell and the embedded runtime.
//!
//! The runtime opens one named method channel (default `deep_link_channel`)
//! over its WebSocket connection. Outbound invocations are JSON-RPC 2.0
//! notifications; [`MethodChannel::invoke`] enqueues the frame synchronously
//! onto the connection's writer task, so delivery order is arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Errors raised when pushing an invocation into the runtime.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The runtime side of the channel is gone. There is no reconnect path —
    /// the channel binding is one-shot per process lifetime.
    #[error("method channel '{name}' is closed")]
    Closed { name: String },
}

/// Outbound half of a named message channel into the application runtime.
///
/// The seam between the mailbox and the wire: production code uses
/// [`MethodChannel`], tests substitute a recording fake.
pub trait DeliveryChannel {
    /// The channel's fixed string identifier, e.g. `deep_link_channel`.
    fn name(&self) -> &str;

    /// Invoke a named method on the runtime with a single string argument.
    ///
    /// Synchronous and non-blocking; an error means the invocation was not
    /// and will not be delivered.
    fn invoke(&self, method: &str, argument: &str) -> Result<(), ChannelError>;
}

/// Wire-backed [`DeliveryChannel`] feeding the attached runtime's socket
/// writer. Cheaply cloneable; all clones share the same queue.
#[derive(Debug, Clone)]
pub struct MethodChannel {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Message>,
}

impl MethodChannel {
    /// Wrap the writer-task queue of an attached runtime connection.
    pub fn new(name: impl AsRef<str>, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            tx,
        }
    }
}

impl DeliveryChannel for MethodChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, method: &str, argument: &str) -> Result<(), ChannelError> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": argument,
        });
        self.tx
            .send(Message::Text(notification.to_string()))
            .map_err(|_| ChannelError::Closed {
                name: self.name.to_string(),
            })
    }
}
