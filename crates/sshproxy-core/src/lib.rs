//! Core abstractions for the SSH proxy lifecycle supervisor.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionConfig` - Immutable parameters of one tunnel session
//! - `ProxyEvent` / `LogEvent` - Typed events observed by front ends
//! - `EventStore` - Broadcast + history for late subscribers
//! - Engine, credential, keep-alive and settings traits

pub mod config;
pub mod event;
pub mod event_store;
pub mod traits;

pub use config::{ConfigError, ProxyKind, SessionConfig};
pub use event::{LogEvent, LogSource, Phase, ProbeResult, ProxyEvent};
pub use event_store::EventStore;
pub use traits::{
    CredentialStager, EngineError, EngineRequest, KeepAlive, SavedSettings, SettingsStore,
    StagingError, StorageError, TunnelEngine, WakeFlag,
};
