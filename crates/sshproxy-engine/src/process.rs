//! Tunnel engine running as an external process group.

use std::process::Stdio;

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use sshproxy_core::{EngineError, EngineRequest, TunnelEngine};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    sync::Mutex,
};

use crate::{
    EngineConfig,
    command::{CommandBuildError, CommandBuilder},
};

/// Maximum stderr captured from an engine that died during start-up.
const STARTUP_STDERR_LIMIT: u64 = 4096;

/// `TunnelEngine` that spawns the engine binary per session.
///
/// The child runs in its own process group so that stopping it also takes
/// down anything it forked.
pub struct ProcessEngine {
    config: EngineConfig,
    builder: CommandBuilder,
    child: Mutex<Option<AsyncGroupChild>>,
}

impl ProcessEngine {
    /// Create an engine client for the given configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let builder = CommandBuilder::new(config.command.clone()).params(config.extra_args.clone());
        Self {
            config,
            builder,
            child: Mutex::new(None),
        }
    }

    /// Whether an engine process is currently alive.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn spawn(&self, request: &EngineRequest) -> Result<AsyncGroupChild, EngineError> {
        let (program, args) = self
            .builder
            .build(request)
            .map_err(|e| EngineError::StartFailed(e.to_string()))?
            .into_resolved()
            .await
            .map_err(|e| match e {
                CommandBuildError::NotFound(name) => EngineError::ExecutableNotFound(name),
                other => EngineError::StartFailed(other.to_string()),
            })?;

        tracing::debug!(program = %program.display(), ?request, "Spawning engine");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.group_spawn().map_err(|e| {
            EngineError::StartFailed(format!("Failed to spawn {}: {e}", program.display()))
        })
    }
}

#[async_trait]
impl TunnelEngine for ProcessEngine {
    async fn start(&self, request: &EngineRequest) -> Result<(), EngineError> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if child.try_wait()?.is_none() {
                return Err(EngineError::AlreadyRunning);
            }
            tracing::debug!("Reaping exited engine before restart");
            *guard = None;
        }

        let mut child = self.spawn(request).await?;

        tokio::time::sleep(self.config.startup_grace()).await;
        if let Some(status) = child.try_wait()? {
            let stderr = read_startup_stderr(&mut child).await;
            let mut message = format!("Engine exited during start-up ({status})");
            if !stderr.is_empty() {
                message.push_str(": ");
                message.push_str(&stderr);
            }
            return Err(EngineError::StartFailed(message));
        }

        if let Some(stderr) = child.inner().stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "sshproxy_engine::child", "{line}");
                }
            });
        }

        tracing::info!(
            host = %request.host,
            local_port = request.local_port,
            proxy_kind = %request.proxy_kind,
            "Engine started"
        );
        *guard = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Err(EngineError::NotRunning);
        };

        if let Some(status) = child.try_wait()? {
            tracing::debug!(%status, "Engine had already exited");
            *guard = None;
            return Err(EngineError::NotRunning);
        }

        // Cleared only once reaped.
        child
            .start_kill()
            .map_err(|e| EngineError::StopFailed(format!("Failed to kill engine: {e}")))?;
        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::StopFailed(format!("Failed to reap engine: {e}")))?;
        *guard = None;
        tracing::info!(%status, "Engine stopped");
        Ok(())
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.get_mut().take() {
            let _ = child.start_kill();
        }
    }
}

async fn read_startup_stderr(child: &mut AsyncGroupChild) -> String {
    let Some(stderr) = child.inner().stderr.take() else {
        return String::new();
    };
    let mut buf = String::new();
    let _ = stderr.take(STARTUP_STDERR_LIMIT).read_to_string(&mut buf).await;
    buf.trim().to_string()
}
