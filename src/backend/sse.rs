//! Server-Sent Events decoding for the turn stream
//!
//! Bytes arrive in arbitrary chunks. A multi-byte character or a record line
//! may straddle a chunk boundary, so the decoder carries both the undecoded
//! byte tail and the unterminated line between reads.

use super::BackendError;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Only lines starting with this prefix carry events
pub const DATA_PREFIX: &str = "data: ";

const MAX_LOGGED_RECORD_CHARS: usize = 200;

/// One event record, keyed by the payload's own `type` field
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub event_type: String,
    pub payload: Value,
}

/// Lazy, finite sequence of records for one turn
pub type RecordStream = BoxStream<'static, Result<StreamRecord, BackendError>>;

/// Incremental bytes -> records decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence
    undecoded: Vec<u8>,
    /// Text after the last line break
    partial_line: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every record completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        let text = self.decode_utf8(chunk);
        self.partial_line.push_str(&text);

        let mut records = Vec::new();
        while let Some(pos) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=pos).collect();
            if let Some(record) = parse_line(line.trim_end_matches(['\n', '\r'])) {
                records.push(record);
            }
        }
        records
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<StreamRecord> {
        if !self.undecoded.is_empty() {
            let tail = String::from_utf8_lossy(&self.undecoded).into_owned();
            self.undecoded.clear();
            self.partial_line.push_str(&tail);
        }
        let line = std::mem::take(&mut self.partial_line);
        parse_line(line.trim_end_matches('\r')).into_iter().collect()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.undecoded.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.undecoded.len());
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(text) => {
                    out.push_str(text);
                    self.undecoded.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.undecoded[..valid]));
                    if let Some(bad) = e.error_len() {
                        out.push(char::REPLACEMENT_CHARACTER);
                        self.undecoded.drain(..valid + bad);
                    } else {
                        // Incomplete sequence at the end; wait for the next chunk
                        self.undecoded.drain(..valid);
                        break;
                    }
                }
            }
        }
        out
    }
}

/// Parse a single line. Non-data lines are ignored; malformed data lines are
/// logged and skipped.
pub fn parse_line(line: &str) -> Option<StreamRecord> {
    let data = line.strip_prefix(DATA_PREFIX)?;

    let payload: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                error = %e,
                record = %truncate_for_log(data),
                "Skipping malformed SSE record"
            );
            return None;
        }
    };

    if let Some(event_type) = payload.get("type").and_then(Value::as_str) {
        Some(StreamRecord {
            event_type: event_type.to_string(),
            payload,
        })
    } else {
        tracing::warn!(
            record = %truncate_for_log(data),
            "Skipping SSE record without a type"
        );
        None
    }
}

fn truncate_for_log(data: &str) -> String {
    data.chars().take(MAX_LOGGED_RECORD_CHARS).collect()
}

struct RecordState<S> {
    /// Dropped as soon as the stream reaches any terminal state
    body: Option<Pin<Box<S>>>,
    decoder: SseDecoder,
    ready: VecDeque<StreamRecord>,
    cancel: CancellationToken,
    body_ended: bool,
}

impl<S> RecordState<S> {
    fn release(&mut self) {
        self.body = None;
        self.ready.clear();
    }
}

/// Turn a response body into a record stream.
///
/// Cancellation is checked before every record is handed out and raced
/// against every read; it surfaces once as [`BackendError::cancelled`] and
/// then the stream ends. The body is released on every exit path.
pub fn record_stream<S, B, E>(body: S, cancel: CancellationToken) -> RecordStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = RecordState {
        body: Some(Box::pin(body)),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        cancel,
        body_ended: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.cancel.is_cancelled() {
                if st.body.is_none() && st.body_ended && st.ready.is_empty() {
                    return None;
                }
                st.release();
                st.body_ended = true;
                return Some((Err(BackendError::cancelled()), st));
            }

            if let Some(record) = st.ready.pop_front() {
                return Some((Ok(record), st));
            }

            let Some(body) = st.body.as_mut() else {
                return None;
            };

            let next = tokio::select! {
                biased;
                () = st.cancel.cancelled() => continue,
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let records = st.decoder.push(chunk.as_ref());
                    st.ready.extend(records);
                }
                Some(Err(e)) => {
                    st.release();
                    st.body_ended = true;
                    return Some((
                        Err(BackendError::network(format!("stream read failed: {e}"))),
                        st,
                    ));
                }
                None => {
                    let records = st.decoder.finish();
                    st.ready.extend(records);
                    st.body = None;
                    st.body_ended = true;
                }
            }
        }
    })
    .boxed()
}
