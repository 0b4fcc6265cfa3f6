//! Line decoder for the `data: ` framed event stream
//!
//! The server sends newline-delimited text. Only lines that begin with
//! [`EVENT_PREFIX`] carry an event; everything else (blank separators,
//! comments, stray output) is skipped. Chunk boundaries can fall anywhere,
//! including inside the prefix, the JSON, or a multibyte character, so the
//! decoder buffers raw bytes and only splits on `\n`.

use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use tokio_stream::Stream;

use crate::{
    error::{Error, Result},
    events::StreamEvent,
};

/// Marker that introduces an event line
pub const EVENT_PREFIX: &str = "data: ";

/// Incremental decoder holding the incomplete tail between chunks
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to contain no newline
    scanned: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk to the carry-over buffer
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode the next complete event line, if one is buffered.
    ///
    /// Returns `Some(Err(_))` for a qualifying line with malformed JSON; the
    /// line is consumed so the caller can keep going.
    pub fn next_record(&mut self) -> Option<Result<StreamEvent>> {
        loop {
            let newline = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            let Some(end) = newline else {
                self.scanned = self.buffer.len();
                return None;
            };

            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            if let Some(record) = decode_line(&line[..line.len() - 1]) {
                return Some(record);
            }
        }
    }

    /// Flush whatever partial line remains at end of stream.
    ///
    /// The buffer is emptied whether or not the tail decodes.
    pub fn finish(&mut self) -> Option<Result<StreamEvent>> {
        let tail = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if tail.is_empty() {
            return None;
        }
        decode_line(&tail)
    }

    /// Number of bytes waiting for a newline
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drain every complete record currently buffered
    pub fn records(&mut self) -> Records<'_> {
        Records { decoder: self }
    }
}

/// Iterator returned by [`EventDecoder::records`]
pub struct Records<'a> {
    decoder: &'a mut EventDecoder,
}

impl Iterator for Records<'_> {
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_record()
    }
}

/// Decode one line (without its `\n`). `None` means the line is not an event.
fn decode_line(raw: &[u8]) -> Option<Result<StreamEvent>> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let payload = raw.strip_prefix(EVENT_PREFIX.as_bytes())?;
    let text = String::from_utf8_lossy(payload);

    Some(
        serde_json::from_str::<StreamEvent>(&text).map_err(|source| Error::Decode {
            line: text.into_owned(),
            source,
        }),
    )
}

/// Decode a whole byte stream lazily.
///
/// Transport errors are passed through and end the stream; decode errors
/// are yielded in place and decoding continues.
pub fn decode_stream<S>(chunks: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<Bytes>>,
{
    stream! {
        let mut decoder = EventDecoder::new();
        futures::pin_mut!(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    decoder.push(&bytes);
                    for record in decoder.records() {
                        yield record;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if let Some(record) = decoder.finish() {
            yield record;
        }
    }
}
