//! Wire protocol for client-server communication.

use serde::{Deserialize, Serialize};
use sshproxy_core::{ProxyEvent, SessionConfig};
use sshproxy_session::SessionSnapshot;

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a proxy session.
    Start { config: SessionConfig },
    /// Stop the active session.
    Stop,
    /// Request the current session snapshot.
    Status,
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Parse a JSON text frame.
    ///
    /// # Errors
    /// Returns error if the text is not a valid client message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Supervisor event (log line, phase change or health update).
    Event { event: ProxyEvent },
    /// Current session snapshot.
    Status { snapshot: SessionSnapshot },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<ProxyEvent> for ServerMessage {
    fn from(event: ProxyEvent) -> Self {
        Self::Event { event }
    }
}
