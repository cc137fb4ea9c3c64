use agentflow_core::{StreamWriteError, TraceChunk};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

/// Ordered destination of one execution's trace chunks.
///
/// Every chunk is recorded in memory; a streaming sink also writes each one
/// as a JSON line onto the outbound channel. Clones share the same trace.
#[derive(Clone)]
pub struct TraceSink {
    inner: Arc<Mutex<SinkState>>,
}

struct SinkState {
    chunks: Vec<TraceChunk>,
    writer: Option<mpsc::Sender<Vec<u8>>>,
    streaming: bool,
    write_failed: bool,
    last_at: Option<DateTime<Utc>>,
}

impl TraceSink {
    /// In-memory sink for buffered execution.
    pub fn buffered() -> Self {
        Self::with_writer(None)
    }

    /// Streaming sink plus the byte stream a response body reads from.
    pub fn streaming(capacity: usize) -> (Self, ReceiverStream<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::with_writer(Some(tx)), ReceiverStream::new(rx))
    }

    fn with_writer(writer: Option<mpsc::Sender<Vec<u8>>>) -> Self {
        let streaming = writer.is_some();
        Self {
            inner: Arc::new(Mutex::new(SinkState {
                chunks: Vec::new(),
                writer,
                streaming,
                write_failed: false,
                last_at: None,
            })),
        }
    }

    /// Emits the chunk built by `build` at the next trace timestamp.
    ///
    /// Timestamps are strictly increasing in emission order.
    pub async fn emit_with<F>(&self, build: F) -> DateTime<Utc>
    where
        F: FnOnce(DateTime<Utc>) -> TraceChunk,
    {
        let mut state = self.inner.lock().await;
        let now = Utc::now();
        let at = match state.last_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        state.last_at = Some(at);
        let chunk = build(at);
        state.write(chunk).await;
        at
    }

    /// Emits a chunk that carries no timestamp of its own.
    pub async fn emit(&self, chunk: TraceChunk) {
        let mut state = self.inner.lock().await;
        state.write(chunk).await;
    }

    /// Closes the outbound stream. Safe to call more than once.
    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        if state.writer.take().is_some() {
            tracing::debug!(chunks = state.chunks.len(), "trace stream closed");
        }
    }

    pub async fn chunks(&self) -> Vec<TraceChunk> {
        self.inner.lock().await.chunks.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.chunks.len()
    }

    pub async fn is_streaming(&self) -> bool {
        self.inner.lock().await.streaming
    }
}

impl SinkState {
    async fn write(&mut self, chunk: TraceChunk) {
        if let Some(writer) = &self.writer {
            let sent = match chunk.to_json_line() {
                Ok(line) => writer.send(line).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(message) = sent {
                self.fail(StreamWriteError { message });
            }
        }
        self.chunks.push(chunk);
    }

    fn fail(&mut self, err: StreamWriteError) {
        if !self.write_failed {
            self.write_failed = true;
            tracing::warn!(error = %err, "trace stream unavailable, continuing without it");
        }
        self.writer = None;
    }
}
