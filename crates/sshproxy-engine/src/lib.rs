//! Tunnel engine client backed by an external process.
//!
//! Provides:
//! - `ProcessEngine` - `TunnelEngine` driving an `ssh2socks5`-style binary
//! - Command building utilities
//! - Executable resolution

pub mod command;
pub mod config;
pub mod process;
pub mod resolve;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use config::EngineConfig;
pub use process::ProcessEngine;
pub use resolve::resolve_executable_path;
