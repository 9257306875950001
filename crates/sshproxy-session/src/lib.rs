//! Proxy lifecycle supervision for a single SSH tunnel session.
//!
//! Provides:
//! - `Supervisor` - Start/Stop state machine owning the active session
//! - Health monitor and engine log relay, scoped to a session
//! - Storage implementations (credential staging, persisted settings)

pub mod config;
pub mod health;
pub mod relay;
pub mod storage;
pub mod supervisor;

pub use config::{ConfigError, SupervisorConfig};
pub use health::probe;
pub use relay::RelayError;
pub use storage::{FileStager, FileStore, MemoryStore};
pub use supervisor::{SessionSnapshot, Supervisor, SupervisorBuilder, SupervisorError};
