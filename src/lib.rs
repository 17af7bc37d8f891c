//! Agent Chat Client
//!
//! A chat client for agent conversation backends. Each user message is posted
//! to a per-user conversation endpoint; the reply arrives either as one JSON
//! document or as a `text/event-stream` that is decoded incrementally and
//! merged into the transcript as it arrives.
//!
//! # Architecture
//!
//! - **Stream decoding**: blank-line framing, block parsing, event interpretation
//! - **Transcript**: append-only message log addressed through stable locators
//! - **Controller**: single-flight exchanges, event routing, typing/progress state
//! - **Transport**: reqwest-based HTTP seam, JSON vs. stream classification
//!
//! # Modules
//!
//! - [`config`]: Layered configuration (defaults, file, env, CLI)
//! - [`controller`]: Exchange orchestration and event routing
//! - [`error`]: Error taxonomy
//! - [`render`]: Incremental terminal output
//! - [`stream`]: Event stream decoder
//! - [`transcript`]: Conversation log
//! - [`transport`]: Backend transport
//! - [`wire`]: Request/reply types and block encoding

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod controller;
pub mod error;
pub mod render;
pub mod stream;
pub mod transcript;
pub mod transport;
pub mod wire;

pub use controller::{ChatController, IgnoreReason, Indicators, SendOutcome};
pub use error::{Error, Result};
pub use stream::StreamEvent;
pub use transcript::{Message, MessageId, Role, Transcript};
pub use transport::{ConversationTransport, HttpTransport, Reply};
