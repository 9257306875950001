//! Transport layer for proxy front ends.
//!
//! Provides:
//! - Wire protocol (JSON frames)
//! - WebSocket transport (feature: websocket)
//! - SSE event stream (feature: sse)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
