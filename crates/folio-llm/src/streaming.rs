use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};

use folio_core::error::{FolioError, Result};
use folio_core::traits::StreamListener;

/// Incremental parser for `text/event-stream` bodies.
///
/// Events are separated by a blank line; `data:` lines of one event are
/// joined with `\n`.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text into the parser and drain every complete event.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();

            let mut event_type = None;
            let mut data_lines = Vec::new();
            for line in block.lines() {
                if let Some(val) = line.strip_prefix("event:") {
                    event_type = Some(val.trim_start().to_string());
                } else if let Some(val) = line.strip_prefix("data:") {
                    data_lines.push(val.strip_prefix(' ').unwrap_or(val).to_string());
                }
            }

            if !data_lines.is_empty() {
                events.push(SseEvent {
                    event_type,
                    data: data_lines.join("\n"),
                });
            }
        }

        events
    }
}

/// SSE events decoded from a byte stream.
///
/// Transport errors surface as `Err` items; invalid UTF-8 across chunk
/// boundaries is buffered until the sequence completes.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: Vec<SseEvent>,
    partial: Vec<u8>,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: Vec::new(),
            partial: Vec::new(),
        }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<SseEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if !this.pending.is_empty() {
                return Poll::Ready(Some(Ok(this.pending.remove(0))));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.partial.extend_from_slice(&bytes);
                    let valid = match std::str::from_utf8(&this.partial) {
                        Ok(text) => text.len(),
                        Err(e) => e.valid_up_to(),
                    };
                    let complete: Vec<u8> = this.partial.drain(..valid).collect();
                    let text = String::from_utf8_lossy(&complete);
                    this.pending = this.parser.feed(&text);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(FolioError::Llm(format!(
                        "stream interrupted: {}",
                        e
                    )))))
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Drain a stream of text deltas into one string, forwarding each delta to
/// the listener.
pub async fn collect_text<S>(mut deltas: S, listener: Option<Arc<dyn StreamListener>>) -> Result<String>
where
    S: Stream<Item = Result<String>> + Unpin,
{
    let mut text = String::new();
    while let Some(delta) = deltas.next().await {
        let delta = delta?;
        if let Some(l) = &listener {
            l.on_delta(&delta);
        }
        text.push_str(&delta);
    }
    if let Some(l) = &listener {
        l.on_complete(&text);
    }
    Ok(text)
}
