//! Incremental terminal rendering of a transcript.
//!
//! The renderer remembers how much of each message it has written and, on
//! every call, prints only what was added since. User messages are not
//! echoed; the terminal already shows what was typed.

use std::io::{self, Write};

use crate::transcript::{Role, Transcript};

const ASSISTANT_LABEL: &str = "assistant> ";

/// Writes transcript growth to a terminal-like sink.
#[derive(Debug)]
pub struct TerminalRenderer<W: Write> {
    out: W,
    /// Bytes of each message already written, by index.
    written: Vec<usize>,
    /// Index of the message whose line is still open.
    open: Option<usize>,
}

impl<W: Write> TerminalRenderer<W> {
    /// Create a renderer writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: Vec::new(),
            open: None,
        }
    }

    /// Write whatever changed since the last call.
    pub fn render(&mut self, transcript: &Transcript) -> io::Result<()> {
        let messages = transcript.snapshot();
        self.written.resize(messages.len().max(self.written.len()), 0);

        for (index, message) in messages.iter().enumerate() {
            if message.role == Role::User || !message.is_visible() {
                continue;
            }

            let content = message.content.as_str();
            let done = self.written[index];
            if content.len() <= done || !content.is_char_boundary(done) {
                // Trimmed at the end of the exchange, or rewritten wholesale.
                self.written[index] = content.len();
                continue;
            }

            if self.open != Some(index) {
                if self.open.is_some() {
                    writeln!(self.out)?;
                }
                if done == 0 {
                    write!(self.out, "{ASSISTANT_LABEL}")?;
                }
                self.open = Some(index);
            }
            write!(self.out, "{}", &content[done..])?;
            self.written[index] = content.len();
        }

        self.out.flush()
    }

    /// Close the open line, if any.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.open.take().is_some() {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    /// Consume the renderer and return the sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}
