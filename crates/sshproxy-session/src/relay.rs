//! Engine log stream relay.
//!
//! Subscribes to the engine's line-oriented event stream and republishes
//! each payload line as an engine-sourced log event.

use std::sync::Arc;

use futures::StreamExt;
use sshproxy_core::EventStore;
use tokio_util::sync::CancellationToken;

use crate::supervisor::SupervisorError;

/// Log relay error.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("stream closed by engine")]
    Closed,
}

/// Longest partial line held while waiting for a newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits a byte stream into lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters
/// split across chunks decode intact. A partial line that grows past
/// `MAX_LINE_BYTES` is discarded up to the next newline.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            if std::mem::take(&mut self.overflowed) {
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.pending.len() > MAX_LINE_BYTES {
            tracing::warn!(bytes = self.pending.len(), "Dropping oversized log line");
            self.pending.clear();
            self.overflowed = true;
        }
        lines
    }
}

/// Strip `marker` from a payload line; other lines yield `None`.
fn payload<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker).filter(|content| !content.is_empty())
}

/// Relay task bound to one session.
pub(crate) struct LogRelay {
    pub endpoint: String,
    pub marker: String,
    pub events: Arc<EventStore>,
    pub cancel: CancellationToken,
}

impl LogRelay {
    /// Run until the stream fails or the session is cancelled.
    ///
    /// Cancellation drops the in-flight read, which closes the connection.
    pub async fn run(self) {
        let result = tokio::select! {
            () = self.cancel.cancelled() => return,
            result = self.relay() => result,
        };

        if let Err(e) = result {
            if self.cancel.is_cancelled() {
                return;
            }
            let err = SupervisorError::LogStream(e.to_string());
            tracing::warn!(endpoint = %self.endpoint, error = %err, "Log stream relay stopped");
            self.events.push_system(err.to_string());
        }
    }

    async fn relay(&self) -> Result<(), RelayError> {
        let client = reqwest::Client::builder().build()?;
        let response = client
            .get(&self.endpoint)
            .header("Accept", "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!(endpoint = %self.endpoint, "Subscribed to engine log stream");

        let mut stream = std::pin::pin!(response.bytes_stream());
        let mut buffer = LineBuffer::default();
        while let Some(chunk) = stream.next().await {
            for line in buffer.push(&chunk?) {
                if let Some(message) = payload(&line, &self.marker) {
                    self.events.push_engine(message);
                }
            }
        }

        Err(RelayError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sshproxy_core::{LogSource, ProxyEvent};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

    async fn read_request(stream: &mut TcpStream) {
        let mut buf = vec![0u8; 4096];
        let mut seen = Vec::new();
        while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }
    }

    fn relay(endpoint: String, events: Arc<EventStore>) -> (LogRelay, CancellationToken) {
        let cancel = CancellationToken::new();
        let relay = LogRelay {
            endpoint,
            marker: "data: ".to_string(),
            events,
            cancel: cancel.clone(),
        };
        (relay, cancel)
    }

    #[test]
    fn test_line_buffer_joins_partial_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: hel").is_empty());
        assert_eq!(buffer.push(b"lo\r\n\ndata: "), vec!["data: hello", ""]);
        assert_eq!(buffer.push("wörld\n".as_bytes()), vec!["data: wörld"]);
    }

    #[test]
    fn test_line_buffer_keeps_split_utf8() {
        let mut buffer = LineBuffer::default();
        let bytes = "ö\n".as_bytes();
        assert!(buffer.push(&bytes[..1]).is_empty());
        assert_eq!(buffer.push(&bytes[1..]), vec!["ö"]);
    }

    #[test]
    fn test_line_buffer_drops_oversized_line() {
        let mut buffer = LineBuffer::default();
        let chunk = vec![b'x'; 16 * 1024];
        for _ in 0..8 {
            assert!(buffer.push(&chunk).is_empty());
        }
        assert!(buffer.pending.len() <= MAX_LINE_BYTES);

        assert_eq!(buffer.push(b"tail\ndata: next\n"), vec!["data: next"]);
        assert!(buffer.pending.is_empty());
    }

    #[test]
    fn test_payload_requires_marker() {
        assert_eq!(payload("data: connected", "data: "), Some("connected"));
        assert_eq!(payload(": keep-alive", "data: "), None);
        assert_eq!(payload("event: log", "data: "), None);
        assert_eq!(payload("data: ", "data: "), None);
    }

    #[tokio::test]
    async fn test_relays_marked_lines_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            stream.write_all(SSE_HEAD.as_bytes()).await.unwrap();
            stream
                .write_all(b"data: first\n\n: comment\ndata: sec")
                .await
                .unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            stream.write_all(b"ond\n\n").await.unwrap();
        });

        let events = Arc::new(EventStore::new());
        let (relay, _cancel) = relay(format!("http://{addr}/logs"), Arc::clone(&events));
        tokio::time::timeout(Duration::from_secs(5), relay.run())
            .await
            .unwrap();

        let logs = events.log_history();
        let engine: Vec<_> = logs
            .iter()
            .filter(|l| l.source == LogSource::Engine)
            .map(|l| l.message.as_str())
            .collect();
        assert_eq!(engine, vec!["first", "second"]);

        let last = logs.last().unwrap();
        assert_eq!(last.source, LogSource::System);
        assert!(last.message.contains("closed"), "{}", last.message);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_emits_system_log() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let events = Arc::new(EventStore::new());
        let (relay, _cancel) = relay(format!("http://{addr}/logs"), Arc::clone(&events));
        relay.run().await;

        let history = events.get_history();
        assert_eq!(history.len(), 1);
        let ProxyEvent::Log(log) = &history[0] else {
            panic!("expected a log event");
        };
        assert_eq!(log.source, LogSource::System);
        assert!(log.message.starts_with("Log stream failed"));
    }

    #[tokio::test]
    async fn test_cancel_releases_connection_silently() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            stream.write_all(SSE_HEAD.as_bytes()).await.unwrap();
            stream.write_all(b"data: hello\n\n").await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let _ = closed_tx.send(n);
        });

        let events = Arc::new(EventStore::new());
        let (relay, cancel) = relay(format!("http://{addr}/logs"), Arc::clone(&events));
        let handle = tokio::spawn(relay.run());

        let mut rx = events.history_plus_stream();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_log().map(|l| l.message.as_str()), Some("hello"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let read = tokio::time::timeout(Duration::from_secs(1), closed_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
        assert_eq!(events.log_history().len(), 1);
    }
}
