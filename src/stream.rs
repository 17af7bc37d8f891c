//! Event stream decoder.
//!
//! Turns a `text/event-stream` body into an ordered sequence of
//! [`StreamEvent`]s. Decoding happens in three steps:
//!
//! 1. [`BlockBuffer`] accumulates raw chunks and cuts out complete blocks at
//!    each blank line, keeping any unfinished tail for the next chunk.
//! 2. [`parse_block`] classifies the lines of one block into an event name and
//!    data fragments, and parses the joined data as JSON when possible.
//! 3. [`interpret`] maps a parsed block to a delta, a named event, or the
//!    terminal signal.
//!
//! [`decode`] glues the steps onto an async byte stream and stops reading as
//! soon as the terminal signal is seen.
//!
//! # Example
//!
//! ```rust
//! use agent_chat_client::stream::{BlockBuffer, StreamEvent, interpret, parse_block};
//!
//! let mut buffer = BlockBuffer::default();
//! buffer.push(b"data: \"hel");
//! assert!(buffer.next_block().is_none());
//! buffer.push(b"lo\"\n\n");
//!
//! let block = buffer.next_block().unwrap();
//! let event = interpret(&parse_block(&block));
//! assert_eq!(event, Some(StreamEvent::Delta { text: "hello".to_string() }));
//! ```

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::Result;
use crate::wire::DONE_SENTINEL;

/// Event name assumed when a block carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// Event name that terminates the stream.
pub const DONE_EVENT: &str = "done";

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// A decoded event stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// One decoded unit of the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Plain content to append to the message being written.
    Delta {
        /// Text fragment.
        text: String,
    },
    /// Any event other than `message` and `done`, payload untouched.
    Named {
        /// Event name as sent by the server.
        name: String,
        /// Parsed JSON payload, or the raw text as a JSON string.
        payload: Value,
    },
    /// End of stream. Nothing follows.
    Done,
}

impl StreamEvent {
    /// Returns true if nothing may follow this event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates raw chunks and yields complete blocks.
///
/// Bytes are kept undecoded until a block is complete, so a multi-byte
/// character split across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct BlockBuffer {
    buf: Vec<u8>,
}

impl BlockBuffer {
    /// Append a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete, non-blank block.
    ///
    /// Whitespace-only blocks are dropped. Returns `None` once only an
    /// incomplete tail remains.
    pub fn next_block(&mut self) -> Option<String> {
        while let Some(pos) = find_double_newline(&self.buf) {
            let frame = self.buf.drain(..pos + 2).collect::<Vec<_>>();
            let text = String::from_utf8_lossy(&frame[..pos]);
            if text.trim().is_empty() {
                continue;
            }
            return Some(text.into_owned());
        }
        None
    }

    /// Bytes received but not yet part of a complete block.
    #[must_use]
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Block parsing
// ─────────────────────────────────────────────────────────────────────────────

/// A block split into its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Value of the last `event:` line, if any.
    pub event: Option<String>,
    /// All `data:` fragments joined with `\n`.
    pub raw_data: String,
    /// `raw_data` parsed as JSON, or `raw_data` itself as a JSON string.
    pub data: Value,
}

impl Block {
    /// Effective event name; empty and missing names fall back to `message`.
    #[must_use]
    pub fn name(&self) -> &str {
        match self.event.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_EVENT,
        }
    }
}

/// Parse one block.
///
/// `event:` sets the name (last one wins), `data:` lines contribute their
/// remainder minus one optional leading space. Everything else, comments
/// included, is ignored.
#[must_use]
pub fn parse_block(block: &str) -> Block {
    let mut event = None;
    let mut fragments = Vec::new();

    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            fragments.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    let raw_data = fragments.join("\n");
    let data =
        serde_json::from_str(&raw_data).unwrap_or_else(|_| Value::String(raw_data.clone()));

    Block {
        event,
        raw_data,
        data,
    }
}

/// Map a parsed block onto a [`StreamEvent`].
///
/// Returns `None` for `message` blocks that carry no text.
#[must_use]
pub fn interpret(block: &Block) -> Option<StreamEvent> {
    let name = block.name();

    if name == DONE_EVENT || block.data.as_str() == Some(DONE_SENTINEL) {
        return Some(StreamEvent::Done);
    }

    if name == DEFAULT_EVENT {
        let text = match &block.data {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("text").and_then(Value::as_str).unwrap_or_default(),
            _ => "",
        };
        return (!text.is_empty()).then(|| StreamEvent::Delta {
            text: text.to_string(),
        });
    }

    Some(StreamEvent::Named {
        name: name.to_string(),
        payload: block.data.clone(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Async decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Decode a chunked body into a lazy stream of events.
///
/// The output ends after [`StreamEvent::Done`] (the body is not polled again)
/// or when the body is exhausted. A chunk error is forwarded and ends the
/// stream; events already yielded stay delivered.
pub fn decode<S, B>(body: S) -> EventStream
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let out = async_stream::stream! {
        let mut buffer = BlockBuffer::default();

        futures::pin_mut!(body);
        'read: while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err);
                    break 'read;
                }
            };
            buffer.push(chunk.as_ref());

            while let Some(text) = buffer.next_block() {
                let block = parse_block(&text);
                tracing::trace!(event = %block.name(), data_len = block.raw_data.len(), "Stream block");

                if let Some(event) = interpret(&block) {
                    let terminal = event.is_terminal();
                    yield Ok(event);
                    if terminal {
                        break 'read;
                    }
                }
            }
        }
    };

    Box::pin(out)
}
