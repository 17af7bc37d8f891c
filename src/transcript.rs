//! Conversation transcript.
//!
//! The transcript is an append-only list of [`Message`]s. Every append hands
//! back a [`MessageId`] locator; later mutations (streamed deltas, final trim,
//! wholesale replacement) address the message through that locator rather
//! than through "the last message", so they stay correct even if something
//! else is appended in between.
//!
//! One message at a time may be the *stream target*: the assistant
//! placeholder created together with the user message of the exchange in
//! flight.
//!
//! # Example
//!
//! ```rust
//! use agent_chat_client::transcript::{Role, Transcript};
//!
//! let transcript = Transcript::new();
//! let target = transcript.begin_exchange("Hello!");
//! transcript.apply_delta(target, "Hi ");
//! transcript.apply_delta(target, "there\n");
//! transcript.finalize(target);
//!
//! let messages = transcript.snapshot();
//! assert_eq!(messages.len(), 2);
//! assert_eq!(messages[1].role, Role::Assistant);
//! assert_eq!(messages[1].content, "Hi there");
//! ```

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Typed by the user.
    User,
    /// Produced by the backend, or a client-side notice.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Set on the empty assistant message created at the start of an exchange.
    #[serde(skip)]
    placeholder: bool,
}

impl Message {
    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            placeholder: false,
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            placeholder: false,
        }
    }

    /// Create the empty assistant message that an exchange streams into.
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            placeholder: true,
        }
    }

    /// Whether this message was created as an exchange placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Whether this message should be shown.
    ///
    /// A placeholder stays hidden until it has non-blank content.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        !(self.placeholder && self.content.trim().is_empty())
    }
}

/// Stable locator of a message inside one [`Transcript`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(usize);

impl MessageId {
    /// Position of the message in the transcript.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Shared, append-only conversation log.
///
/// Cloning yields another handle to the same transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    inner: Arc<TranscriptInner>,
}

#[derive(Debug)]
struct TranscriptInner {
    state: RwLock<State>,
    /// Bumped after every mutation.
    revision: watch::Sender<u64>,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<Message>,
    stream_target: Option<MessageId>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(TranscriptInner {
                state: RwLock::new(State::default()),
                revision,
            }),
        }
    }

    /// Create a transcript that opens with an assistant greeting.
    ///
    /// An empty greeting yields an empty transcript.
    #[must_use]
    pub fn with_greeting(greeting: &str) -> Self {
        let transcript = Self::new();
        if !greeting.is_empty() {
            transcript.push(Message::assistant(greeting));
        }
        transcript
    }

    /// Subscribe to change notifications.
    ///
    /// The value is a revision counter; it only tells that something changed.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Append messages atomically and return the locator of the newest one.
    ///
    /// Returns `None` when `messages` is empty.
    pub fn append(&self, messages: impl IntoIterator<Item = Message>) -> Option<MessageId> {
        let mut state = self.write();
        let before = state.messages.len();
        state.messages.extend(messages);
        let newest = (state.messages.len() > before).then(|| MessageId(state.messages.len() - 1));
        drop(state);
        if newest.is_some() {
            self.bump();
        }
        newest
    }

    /// Append a single message.
    pub fn push(&self, message: Message) -> MessageId {
        let mut state = self.write();
        state.messages.push(message);
        let id = MessageId(state.messages.len() - 1);
        drop(state);
        self.bump();
        id
    }

    /// Append the user message and an empty assistant placeholder in one step.
    ///
    /// The placeholder becomes the stream target and its locator is returned.
    pub fn begin_exchange(&self, user_text: impl Into<String>) -> MessageId {
        let mut state = self.write();
        state.messages.push(Message::user(user_text));
        state.messages.push(Message::placeholder());
        let id = MessageId(state.messages.len() - 1);
        state.stream_target = Some(id);
        drop(state);
        self.bump();
        id
    }

    /// Release the stream target, if any.
    pub fn end_exchange(&self) {
        let mut state = self.write();
        state.stream_target = None;
    }

    /// The message currently receiving streamed content.
    #[must_use]
    pub fn stream_target(&self) -> Option<MessageId> {
        self.read().stream_target
    }

    /// Append `text` to the message at `id`.
    ///
    /// Returns false (and changes nothing) if `id` is not in this transcript.
    pub fn apply_delta(&self, id: MessageId, text: &str) -> bool {
        self.mutate(id, |message| message.content.push_str(text))
    }

    /// Append `text` after a single space, unless the content is empty or
    /// already ends in whitespace.
    pub fn append_spaced(&self, id: MessageId, text: &str) -> bool {
        self.mutate(id, |message| {
            let content = &mut message.content;
            if content.chars().next_back().is_some_and(|c| !c.is_whitespace()) {
                content.push(' ');
            }
            content.push_str(text);
        })
    }

    /// Trim trailing whitespace of the message at `id`. Idempotent.
    pub fn finalize(&self, id: MessageId) -> bool {
        self.mutate(id, |message| {
            let trimmed = message.content.trim_end().len();
            message.content.truncate(trimmed);
        })
    }

    /// Overwrite the message at `id`.
    pub fn replace(&self, id: MessageId, message: Message) -> bool {
        self.mutate(id, |slot| *slot = message)
    }

    /// Get a copy of the message at `id`.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.read().messages.get(id.0).cloned()
    }

    /// Get a copy of the newest message.
    #[must_use]
    pub fn last(&self) -> Option<Message> {
        self.read().messages.last().cloned()
    }

    /// Copy of all messages in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.read().messages.clone()
    }

    /// Copy of the messages that should be shown, in order.
    #[must_use]
    pub fn visible(&self) -> Vec<Message> {
        self.read()
            .messages
            .iter()
            .filter(|m| m.is_visible())
            .cloned()
            .collect()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().messages.len()
    }

    /// Check if the transcript has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate(&self, id: MessageId, f: impl FnOnce(&mut Message)) -> bool {
        let mut state = self.write();
        let Some(message) = state.messages.get_mut(id.0) else {
            tracing::debug!(index = id.0, "Ignoring mutation of unknown message");
            return false;
        };
        f(message);
        drop(state);
        self.bump();
        true
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
