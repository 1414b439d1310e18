//! Live event sources
//!
//! The socket to the multi-agent backend belongs to the host application;
//! this crate only needs a stream of raw JSON messages from it. Two sources
//! ship here:
//!
//! - [`ChannelSource`]: fed through a tokio channel by whatever owns the
//!   connection;
//! - [`ReaderSource`]: one message per line from any async reader (captured
//!   JSONL transcripts, stdin).

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

use crate::error::{ReplayError, ReplayResult};

/// The request the backend expects for a safety question
pub fn query_message(query: &str) -> String {
    serde_json::json!({
        "action": "query",
        "query": query,
    })
    .to_string()
}

/// Source of live session messages
#[async_trait]
pub trait LiveEventSource: Send {
    /// Source name (for logging)
    fn name(&self) -> &str;

    /// Open the connection
    async fn connect(&mut self, endpoint: &str) -> ReplayResult<()>;

    /// Ask the backend to run a query
    async fn send_query(&mut self, query: &str) -> ReplayResult<()>;

    /// Next raw message; `Ok(None)` once the source is exhausted
    async fn next_message(&mut self) -> ReplayResult<Option<String>>;

    /// Close the connection
    async fn disconnect(&mut self) -> ReplayResult<()>;
}

/// Source backed by tokio channels
///
/// Inbound messages arrive on `inbound`; query requests are forwarded on
/// `outbound` when one is attached.
pub struct ChannelSource {
    inbound: mpsc::Receiver<String>,
    outbound: Option<mpsc::Sender<String>>,
    connected: bool,
}

impl ChannelSource {
    /// Create a source plus the sender that feeds it
    pub fn new(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::from_receiver(rx))
    }

    pub fn from_receiver(inbound: mpsc::Receiver<String>) -> Self {
        Self {
            inbound,
            outbound: None,
            connected: false,
        }
    }

    /// Forward query requests to `outbound`
    pub fn with_outbound(mut self, outbound: mpsc::Sender<String>) -> Self {
        self.outbound = Some(outbound);
        self
    }
}

#[async_trait]
impl LiveEventSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    async fn connect(&mut self, endpoint: &str) -> ReplayResult<()> {
        tracing::debug!(endpoint, "Channel source connected");
        self.connected = true;
        Ok(())
    }

    async fn send_query(&mut self, query: &str) -> ReplayResult<()> {
        if !self.connected {
            return Err(ReplayError::Transport("not connected".to_string()));
        }
        if let Some(outbound) = &self.outbound {
            outbound
                .send(query_message(query))
                .await
                .map_err(|_| ReplayError::ConnectionClosed)?;
        }
        Ok(())
    }

    async fn next_message(&mut self) -> ReplayResult<Option<String>> {
        if !self.connected {
            return Err(ReplayError::Transport("not connected".to_string()));
        }
        Ok(self.inbound.recv().await)
    }

    async fn disconnect(&mut self) -> ReplayResult<()> {
        self.connected = false;
        self.inbound.close();
        Ok(())
    }
}

/// Source reading newline-delimited JSON messages
///
/// Blank lines are skipped. The query request is not sent anywhere: a
/// transcript already holds the backend's answer.
pub struct ReaderSource<R> {
    lines: Lines<R>,
    connected: bool,
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            connected: false,
        }
    }
}

#[async_trait]
impl<R> LiveEventSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &str {
        "reader"
    }

    async fn connect(&mut self, _endpoint: &str) -> ReplayResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn send_query(&mut self, query: &str) -> ReplayResult<()> {
        tracing::debug!(query_len = query.len(), "Reader source ignores query request");
        Ok(())
    }

    async fn next_message(&mut self) -> ReplayResult<Option<String>> {
        if !self.connected {
            return Err(ReplayError::Transport("not connected".to_string()));
        }
        while let Some(line) = self.lines.next_line().await? {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    async fn disconnect(&mut self) -> ReplayResult<()> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_message_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&query_message("Is SoMa safe?")).unwrap();
        assert_eq!(value["action"], "query");
        assert_eq!(value["query"], "Is SoMa safe?");
    }

    #[tokio::test]
    async fn test_reader_source_skips_blank_lines() {
        let input: &[u8] = b"{\"type\":\"session_started\"}\n\n   \n{\"type\":\"session_complete\"}\n";
        let mut source = ReaderSource::new(input);
        source.connect("stdin").await.unwrap();

        assert_eq!(
            source.next_message().await.unwrap().as_deref(),
            Some("{\"type\":\"session_started\"}")
        );
        assert_eq!(
            source.next_message().await.unwrap().as_deref(),
            Some("{\"type\":\"session_complete\"}")
        );
        assert!(source.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_source_forwards_query() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (tx, source) = ChannelSource::new(4);
        let mut source = source.with_outbound(out_tx);

        assert!(source.next_message().await.is_err());

        source.connect("ws://test").await.unwrap();
        source.send_query("Is the Castro safe?").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), query_message("Is the Castro safe?"));

        tx.send("{}".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(source.next_message().await.unwrap().as_deref(), Some("{}"));
        assert!(source.next_message().await.unwrap().is_none());
    }
}
