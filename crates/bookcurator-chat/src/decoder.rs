use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use tracing::debug;

use crate::errors::TransportError;
use crate::event::StreamEvent;

/// Lazily decoded event sequence for one backend response.
pub type EventStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// Incremental NDJSON decoder scoped to one response body.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte UTF-8 character
/// split across chunks is decoded only once it is complete. Lines that do not
/// parse into a [`StreamEvent`] are dropped.
#[derive(Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
    // Bytes before this offset are known not to contain `\n`.
    scanned: usize,
}

impl NdjsonDecoder {
    /// Buffers `chunk` and returns every event completed by it, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let idx = self.scanned + offset;
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            self.scanned = 0;
            if let Some(event) = decode_line(&line[..idx]) {
                events.push(event);
            }
        }
        self.scanned = self.buf.len();
        events
    }

    /// Flushes the final line when the body did not end with `\n`.
    pub fn finish(self) -> Option<StreamEvent> {
        decode_line(&self.buf)
    }
}

fn decode_line(bytes: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    let event = StreamEvent::parse_line(line);
    if event.is_none() {
        debug!(line_len = line.len(), "dropping malformed stream line");
    }
    event
}

/// Adapts a response byte stream into a lazy stream of decoded events.
///
/// Events are yielded as soon as the chunk completing them arrives. A read
/// error is yielded once as [`TransportError::Read`] and ends the stream; at
/// end of input any unterminated final line is flushed.
pub fn decode_stream<S, B, E>(bytes: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: Pin<Box<S>>,
        decoder: Option<NdjsonDecoder>,
        pending: VecDeque<StreamEvent>,
    }

    let decoded = stream::try_unfold(
        State {
            bytes: Box::pin(bytes),
            decoder: Some(NdjsonDecoder::default()),
            pending: VecDeque::new(),
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                let Some(decoder) = state.decoder.as_mut() else {
                    return Ok(None);
                };

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(decoder.push_chunk(chunk.as_ref()));
                    }
                    Some(Err(e)) => {
                        return Err(TransportError::read(e.to_string()));
                    }
                    None => {
                        if let Some(event) = state.decoder.take().and_then(NdjsonDecoder::finish) {
                            state.pending.push_back(event);
                        }
                    }
                }
            }
        },
    );
    Box::pin(decoded)
}
