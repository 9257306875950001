//! Engine command building utilities.

use std::path::PathBuf;

use sshproxy_core::EngineRequest;
use thiserror::Error;

use crate::resolve::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }
}

/// Builder for engine invocations.
///
/// Session flags follow the engine's CLI:
/// `-host -port -user [-password] -key -lport -proxyType`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command.
    pub base: String,
    /// Optional parameters placed before the session flags.
    pub params: Option<Vec<String>>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
        }
    }

    /// Add parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Build the command for a start request.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn build(&self, request: &EngineRequest) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        if let Some(ref params) = self.params {
            parts.extend(params.iter().cloned());
        }
        parts.extend(session_flags(request));

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

fn session_flags(request: &EngineRequest) -> Vec<String> {
    let mut flags = vec![
        "-host".to_string(),
        request.host.clone(),
        "-port".to_string(),
        request.port.clone(),
        "-user".to_string(),
        request.user.clone(),
    ];
    if !request.password.is_empty() {
        flags.push("-password".to_string());
        flags.push(request.password.clone());
    }
    flags.extend([
        "-key".to_string(),
        request.key_path.to_string_lossy().into_owned(),
        "-lport".to_string(),
        request.local_port.to_string(),
        "-proxyType".to_string(),
        request.proxy_kind.as_str().to_string(),
    ]);
    flags
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        let parts = winsplit::split(input);
        if parts.is_empty() {
            Err(CommandBuildError::EmptyCommand)
        } else {
            Ok(parts)
        }
    }

    #[cfg(not(windows))]
    {
        let parts =
            shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))?;
        if parts.is_empty() {
            Err(CommandBuildError::EmptyCommand)
        } else {
            Ok(parts)
        }
    }
}
