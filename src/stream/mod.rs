//! Server-sent event reader.
//!
//! [`EventStream`] turns a byte stream framed as server-sent events into
//! discrete [`StreamEvent`]s. Records are separated by blank lines; `event:`
//! names the record and every `data:` line adds one line to its payload.
//! Comments (`:`-prefixed lines) and unknown fields are ignored.
//!
//! ```
//! use threadrun::stream::EventStream;
//!
//! # async fn demo() {
//! let body = "event: thread.created\ndata: {\"id\":\"t1\"}\n\n";
//! let mut stream = EventStream::from_chunks(vec![body.as_bytes().to_vec()]);
//! assert!(stream.next().await);
//! let event = stream.event().unwrap();
//! assert_eq!(event.name, "thread.created");
//! assert_eq!(event.payload.string("id").as_deref(), Some("t1"));
//! # }
//! ```

pub mod payload;

pub use payload::Payload;

use std::io::Write;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::RunError;

/// Name given to records that carry data but no `event:` line.
pub const DEFAULT_EVENT_NAME: &str = "message";

/// Byte source feeding an [`EventStream`].
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, RunError>>;

/// One named event and its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub name: String,
    pub payload: Payload,
}

impl StreamEvent {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::new(data),
        }
    }
}

#[derive(Debug, Default)]
struct PendingEvent {
    name: Option<String>,
    data: Vec<String>,
}

impl PendingEvent {
    fn take(&mut self) -> Option<StreamEvent> {
        let name = self.name.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(StreamEvent::new(
            name.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data,
        ))
    }
}

/// Pull-based reader over a server-sent event stream.
pub struct EventStream {
    source: Option<ByteStream>,
    buffer: Vec<u8>,
    pending: PendingEvent,
    current: Option<StreamEvent>,
    error: Option<RunError>,
    tee: Option<Box<dyn Write + Send>>,
    idle_timeout: Option<Duration>,
    eof: bool,
}

impl EventStream {
    pub fn new(source: impl Stream<Item = Result<Vec<u8>, RunError>> + Send + 'static) -> Self {
        Self {
            source: Some(source.boxed()),
            buffer: Vec::new(),
            pending: PendingEvent::default(),
            current: None,
            error: None,
            tee: None,
            idle_timeout: None,
            eof: false,
        }
    }

    /// Wrap an HTTP response body.
    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(RunError::Network)),
        )
    }

    /// Read from in-memory chunks.
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self::new(futures::stream::iter(chunks.into_iter().map(Ok)))
    }

    /// Fail the stream when no bytes arrive within `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Mirror every raw byte read from now on into `sink`.
    pub fn tee(&mut self, sink: Box<dyn Write + Send>) {
        self.tee = Some(sink);
    }

    /// Advance to the next event.
    ///
    /// Returns `false` at end of stream, after [`close`](Self::close), or on
    /// error; check [`err`](Self::err) to tell them apart.
    pub async fn next(&mut self) -> bool {
        loop {
            if let Some(event) = self.parse_buffered() {
                self.current = Some(event);
                return true;
            }
            if self.eof {
                return self.finish();
            }
            let Some(source) = self.source.as_mut() else {
                return false;
            };

            let chunk = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, source.next()).await {
                    Ok(chunk) => chunk,
                    Err(_) => Some(Err(RunError::Timeout(limit.as_millis() as u64))),
                },
                None => source.next().await,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    self.mirror(&bytes);
                    self.buffer.extend_from_slice(&bytes);
                }
                Some(Err(err)) => {
                    debug!(error = %err, "event stream read failed");
                    self.error = Some(err);
                    self.close();
                    return false;
                }
                None => self.eof = true,
            }
        }
    }

    /// The event produced by the last successful [`next`](Self::next).
    pub fn event(&self) -> Option<&StreamEvent> {
        self.current.as_ref()
    }

    /// The error that ended the stream, if any.
    pub fn err(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn take_err(&mut self) -> Option<RunError> {
        self.error.take()
    }

    /// Release the underlying connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!("event stream closed");
        }
        self.buffer.clear();
        self.pending = PendingEvent::default();
        if let Some(tee) = self.tee.as_mut() {
            if let Err(err) = tee.flush() {
                warn!(error = %err, "failed to flush event stream tee");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    fn mirror(&mut self, bytes: &[u8]) {
        let Some(tee) = self.tee.as_mut() else {
            return;
        };
        if let Err(err) = tee.write_all(bytes) {
            warn!(error = %err, "event stream tee failed, disabling it");
            self.tee = None;
        }
    }

    /// Flush the trailing unterminated line and record at end of input.
    fn finish(&mut self) -> bool {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(strip_cr(&line)).into_owned();
            self.apply_line(&line);
        }
        let last = self.pending.take();
        self.close();
        match last {
            Some(event) => {
                self.current = Some(event);
                true
            }
            None => false,
        }
    }

    fn parse_buffered(&mut self) -> Option<StreamEvent> {
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(strip_cr(&raw[..end])).into_owned();

            if line.is_empty() {
                if let Some(event) = self.pending.take() {
                    return Some(event);
                }
                continue;
            }
            self.apply_line(&line);
        }
        None
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.pending.name = Some(value.to_string()),
            "data" => self.pending.data.push(value.to_string()),
            _ => {}
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    async fn collect(stream: &mut EventStream) -> Vec<(String, String)> {
        let mut events = Vec::new();
        while stream.next().await {
            let event = stream.event().unwrap();
            events.push((event.name.clone(), event.payload.raw().to_string()));
        }
        events
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_arrive_in_order_with_names_and_payloads() {
        let body = concat!(
            "event: thread.created\ndata: {\"id\":\"t1\"}\n\n",
            "event: thread.run.created\ndata: {\"id\":\"r1\"}\n\n",
            "event: done\ndata: [DONE]\n\n",
        );
        let mut stream = EventStream::from_chunks(vec![body.as_bytes().to_vec()]);

        assert_eq!(
            collect(&mut stream).await,
            vec![
                ("thread.created".to_string(), "{\"id\":\"t1\"}".to_string()),
                ("thread.run.created".to_string(), "{\"id\":\"r1\"}".to_string()),
                ("done".to_string(), "[DONE]".to_string()),
            ]
        );
        assert!(stream.err().is_none());
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn multi_line_data_is_joined_with_newlines() {
        let body = "event: note\ndata: first\ndata:second\ndata\n\n";
        let mut stream = EventStream::from_chunks(vec![body.as_bytes().to_vec()]);
        assert_eq!(
            collect(&mut stream).await,
            vec![("note".to_string(), "first\nsecond\n".to_string())]
        );
    }

    #[tokio::test]
    async fn records_split_across_chunks_and_crlf_are_handled() {
        let chunks = vec![
            b"event: thread.mess".to_vec(),
            b"age.delta\r\ndata: {\"a\"".to_vec(),
            b":1}\r\n".to_vec(),
            b"\r\n: keep-alive comment\n\nid: 7\nretry: 10\nevent: done\ndata: [DONE]\n\n".to_vec(),
        ];
        let mut stream = EventStream::from_chunks(chunks);
        assert_eq!(
            collect(&mut stream).await,
            vec![
                ("thread.message.delta".to_string(), "{\"a\":1}".to_string()),
                ("done".to_string(), "[DONE]".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unnamed_records_default_and_dataless_records_are_skipped() {
        let body = "data: hi\n\nevent: empty\n\n";
        let mut stream = EventStream::from_chunks(vec![body.as_bytes().to_vec()]);
        assert_eq!(
            collect(&mut stream).await,
            vec![(DEFAULT_EVENT_NAME.to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn unterminated_final_record_is_still_delivered() {
        let body = "event: done\ndata: [DONE]";
        let mut stream = EventStream::from_chunks(vec![body.as_bytes().to_vec()]);
        assert_eq!(
            collect(&mut stream).await,
            vec![("done".to_string(), "[DONE]".to_string())]
        );
    }

    #[tokio::test]
    async fn read_errors_stop_the_stream_and_are_reported() {
        let source = futures::stream::iter(vec![
            Ok(b"event: a\ndata: 1\n\n".to_vec()),
            Err(RunError::Stream("connection reset".into())),
            Ok(b"event: b\ndata: 2\n\n".to_vec()),
        ]);
        let mut stream = EventStream::new(source);

        assert!(stream.next().await);
        assert_eq!(stream.event().unwrap().name, "a");
        assert!(!stream.next().await);
        assert!(matches!(stream.err(), Some(RunError::Stream(_))));
        assert!(!stream.next().await);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_reading() {
        let body = "event: a\ndata: 1\n\nevent: b\ndata: 2\n\n";
        let mut stream = EventStream::from_chunks(vec![body.as_bytes().to_vec()]);
        stream.close();
        stream.close();
        assert!(!stream.next().await);
        assert!(stream.err().is_none());
    }

    #[tokio::test]
    async fn tee_mirrors_raw_bytes_without_changing_parsing() {
        let sink = SharedSink::default();
        let chunks = vec![b"event: a\r\ndata: 1\r\n\r\n".to_vec(), b": ping\n".to_vec()];
        let mut stream = EventStream::from_chunks(chunks);
        stream.tee(Box::new(sink.clone()));

        assert_eq!(collect(&mut stream).await, vec![("a".to_string(), "1".to_string())]);
        assert_eq!(
            sink.0.lock().unwrap().as_slice(),
            b"event: a\r\ndata: 1\r\n\r\n: ping\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_a_silent_stream() {
        let mut stream = EventStream::new(futures::stream::pending())
            .with_idle_timeout(Some(Duration::from_secs(5)));
        assert!(!stream.next().await);
        assert!(matches!(stream.err(), Some(RunError::Timeout(5000))));
    }
}
