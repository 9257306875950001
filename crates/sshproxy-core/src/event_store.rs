//! Broadcast + history event store for supervisor observers.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{LogEvent, Phase, ProbeResult, ProxyEvent};

/// Default history size limit (16 MB).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

/// Live channel capacity. Receivers that fall further behind skip events.
const CHANNEL_CAPACITY: usize = 10_000;

#[derive(Clone)]
struct StoredEvent {
    event: ProxyEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
    limit: usize,
}

/// Event store with broadcast and history support.
///
/// Events are appended under a single write lock, so every subscriber
/// sees one total order that matches the history.
pub struct EventStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<ProxyEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a new event store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(HISTORY_BYTES)
    }

    /// Create a store retaining roughly `limit` bytes of history.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
                limit,
            }),
            sender,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: ProxyEvent) {
        let bytes = event.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let _ = self.sender.send(event.clone()); // live listeners

        while inner.total_bytes.saturating_add(bytes) > inner.limit {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent { event, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push a log line.
    pub fn push_log(&self, log: LogEvent) {
        self.push(ProxyEvent::Log(log));
    }

    /// Push a supervisor-originated log line.
    pub fn push_system<S: Into<String>>(&self, s: S) {
        self.push_log(LogEvent::system(s));
    }

    /// Push an engine-originated log line.
    pub fn push_engine<S: Into<String>>(&self, s: S) {
        self.push_log(LogEvent::engine(s));
    }

    /// Push a phase transition.
    pub fn push_phase(&self, phase: Phase) {
        self.push(ProxyEvent::Phase { phase });
    }

    /// Push a liveness status change.
    pub fn push_health(&self, probe: ProbeResult) {
        self.push(ProxyEvent::Health { probe });
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<ProxyEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<ProxyEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Log lines currently held in history.
    #[must_use]
    pub fn log_history(&self) -> Vec<LogEvent> {
        self.get_history()
            .into_iter()
            .filter_map(|event| match event {
                ProxyEvent::Log(log) => Some(log),
                _ => None,
            })
            .collect()
    }

    /// Phases recorded in history, in transition order.
    #[must_use]
    pub fn phase_history(&self) -> Vec<Phase> {
        self.get_history()
            .into_iter()
            .filter_map(|event| match event {
                ProxyEvent::Phase { phase } => Some(phase),
                _ => None,
            })
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// The snapshot and the subscription are taken under the same lock that
    /// `push` holds, so nothing is duplicated or lost at the seam.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ProxyEvent> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<ProxyEvent> =
                inner.history.iter().map(|s| s.event.clone()).collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!("Event subscriber lagged: {err}");
                    None
                }
            }
        });

        Box::pin(hist.chain(live))
    }

    /// Stream of log lines only (history, then live).
    #[must_use]
    pub fn log_stream(&self) -> futures::stream::BoxStream<'static, LogEvent> {
        self.history_plus_stream()
            .filter_map(|event| {
                future::ready(match event {
                    ProxyEvent::Log(log) => Some(log),
                    _ => None,
                })
            })
            .boxed()
    }

    /// SSE stream (requires `sse` feature).
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn sse_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<axum::response::sse::Event, std::convert::Infallible>>
    {
        self.history_plus_stream()
            .map(|event| Ok::<_, std::convert::Infallible>(event.to_sse_event()))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogSource;

    #[test]
    fn test_history_keeps_push_order() {
        let store = EventStore::new();
        store.push_system("one");
        store.push_phase(Phase::Starting);
        store.push_engine("two");

        let history = store.get_history();
        assert_eq!(history.len(), 3);
        assert_eq!(store.phase_history(), vec![Phase::Starting]);

        let logs = store.log_history();
        assert_eq!(logs[0].message, "one");
        assert_eq!(logs[0].source, LogSource::System);
        assert_eq!(logs[1].message, "two");
        assert_eq!(logs[1].source, LogSource::Engine);
    }

    #[test]
    fn test_history_is_bounded() {
        let store = EventStore::with_history_limit(64);
        for i in 0..20 {
            store.push_system(format!("line {i:02} with some padding"));
        }
        let logs = store.log_history();
        assert!(logs.len() < 20);
        assert_eq!(logs.last().unwrap().message, "line 19 with some padding");
    }

    #[tokio::test]
    async fn test_history_plus_stream_replays_then_follows() {
        let store = EventStore::new();
        store.push_system("before");

        let mut stream = store.log_stream();
        store.push_engine("after");

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.message, "before");
        assert_eq!(second.message, "after");
    }
}
