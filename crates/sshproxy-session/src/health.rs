//! Local liveness probing of the tunnel listener.

use std::{net::SocketAddr, time::Duration};

use sshproxy_core::ProbeResult;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::supervisor::Signal;

/// Attempt one TCP connect to `addr` within `timeout`.
pub async fn probe(addr: SocketAddr, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => ProbeResult::Reachable,
        Ok(Err(e)) => ProbeResult::Unreachable {
            reason: e.to_string(),
        },
        Err(_) => ProbeResult::Unreachable {
            reason: format!("connect timed out after {}ms", timeout.as_millis()),
        },
    }
}

/// Periodic prober bound to one session.
///
/// Results are sent to the supervisor as signals. The monitor exits after
/// reporting the first unreachable probe; it never retries.
pub(crate) struct HealthMonitor {
    pub target: SocketAddr,
    pub interval: Duration,
    pub timeout: Duration,
    pub session: Uuid,
    pub signals: mpsc::UnboundedSender<Signal>,
    pub cancel: CancellationToken,
}

impl HealthMonitor {
    pub async fn run(self) {
        tracing::debug!(target = %self.target, session = %self.session, "Health monitor started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let result = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = probe(self.target, self.timeout) => result,
            };
            if self.cancel.is_cancelled() {
                break;
            }

            let failed = !result.is_reachable();
            let signal = Signal::Probe {
                session: self.session,
                result,
            };
            if self.signals.send(signal).is_err() || failed {
                break;
            }
        }

        tracing::debug!(session = %self.session, "Health monitor exited");
    }
}
