//! Send controller.
//!
//! [`ChatController::send`] runs one exchange end to end:
//!
//! 1. Mark the controller busy (single-flight), show the typing indicator and
//!    reset progress to 0.
//! 2. Append the user message and an empty assistant placeholder in one step;
//!    the placeholder is the stream target for the whole exchange.
//! 3. Post the request through the [`ConversationTransport`].
//! 4. A JSON reply replaces the placeholder. A streamed reply is applied event
//!    by event, in arrival order, then the placeholder is trimmed.
//! 5. Any failure becomes a new assistant message marked with
//!    [`ERROR_MARKER`]; nothing is propagated to the caller.
//! 6. Busy flag and indicators are cleared on every exit path, including
//!    when the `send` future is dropped mid-exchange.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::Result;
use crate::stream::{DONE_EVENT, StreamEvent};
use crate::transcript::{Message, MessageId, Transcript};
use crate::transport::{ConversationTransport, HttpTransport, Reply};
use crate::wire::{ConversationRequest, value_text};

/// Prefix of every client-generated error message.
pub const ERROR_MARKER: &str = "⚠️";

/// Typing and progress state shown next to the transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Indicators {
    /// The assistant is working on a reply.
    pub typing: bool,
    /// Last reported progress in percent, unclamped. `None` hides the bar.
    pub progress: Option<i64>,
}

impl Indicators {
    /// Progress clamped to `0..=100` for display.
    #[must_use]
    pub fn progress_display(&self) -> Option<u8> {
        self.progress.and_then(|p| u8::try_from(p.clamp(0, 100)).ok())
    }
}

/// Result of a [`ChatController::send`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was sent.
    Ignored(IgnoreReason),
    /// The exchange finished and the reply is in the transcript.
    Completed,
    /// The exchange failed; an error message was appended.
    Failed,
}

/// Why a send was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Input was empty or whitespace only.
    EmptyInput,
    /// Another exchange is still running.
    InFlight,
}

/// Drives request/response exchanges against one backend.
pub struct ChatController {
    transport: Arc<dyn ConversationTransport>,
    transcript: Transcript,
    user_id: String,
    client_id: Option<String>,
    in_flight: AtomicBool,
    indicators: watch::Sender<Indicators>,
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("in_flight", &self.in_flight)
            .field("transcript_len", &self.transcript.len())
            .finish()
    }
}

impl ChatController {
    /// Create a controller with a random user ID and no client ID.
    pub fn new(transport: Arc<dyn ConversationTransport>, transcript: Transcript) -> Self {
        let (indicators, _) = watch::channel(Indicators::default());
        Self {
            transport,
            transcript,
            user_id: Uuid::new_v4().to_string(),
            client_id: None,
            in_flight: AtomicBool::new(false),
            indicators,
        }
    }

    /// Build an HTTP-backed controller from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&config.backend)?);
        let transcript = Transcript::with_greeting(&config.client.greeting);

        let mut controller = Self::new(transport, transcript);
        if let Some(user_id) = &config.client.user_id {
            controller = controller.with_user_id(user_id.clone());
        }
        controller.client_id.clone_from(&config.client.client_id);
        Ok(controller)
    }

    /// Use a fixed user ID.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Send a client ID with every request.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// The transcript this controller writes to.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// User ID embedded in the conversation URL.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current indicator state.
    pub fn indicators(&self) -> Indicators {
        *self.indicators.borrow()
    }

    /// Subscribe to indicator changes.
    pub fn subscribe_indicators(&self) -> watch::Receiver<Indicators> {
        self.indicators.subscribe()
    }

    /// Whether an exchange is running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Send `user_text` and apply the reply to the transcript.
    ///
    /// Does nothing for blank input or while another exchange runs. Failures
    /// are reported in the transcript, never returned.
    pub async fn send(&self, user_text: &str) -> SendOutcome {
        if user_text.trim().is_empty() {
            return SendOutcome::Ignored(IgnoreReason::EmptyInput);
        }
        if self.indicators.borrow().typing {
            return SendOutcome::Ignored(IgnoreReason::InFlight);
        }
        let Some(_guard) = InFlightGuard::acquire(self) else {
            debug!(user_id = %self.user_id, "Send ignored, exchange in flight");
            return SendOutcome::Ignored(IgnoreReason::InFlight);
        };

        self.indicators.send_modify(|ind| {
            ind.typing = true;
            ind.progress = Some(0);
        });
        let target = self.transcript.begin_exchange(user_text);

        info!(
            name: "exchange.started",
            user_id = %self.user_id,
            query_length = user_text.len(),
            "Exchange started"
        );

        match self.run_exchange(user_text, target).await {
            Ok(()) => {
                info!(name: "exchange.completed", user_id = %self.user_id, "Exchange completed");
                SendOutcome::Completed
            }
            Err(err) => {
                warn!(name: "exchange.failed", user_id = %self.user_id, error = %err, "Exchange failed");
                self.transcript.push(Message::assistant(format!(
                    "{ERROR_MARKER} Error fetching reply: {err}"
                )));
                SendOutcome::Failed
            }
        }
    }

    async fn run_exchange(&self, user_text: &str, target: MessageId) -> Result<()> {
        let request = ConversationRequest {
            user_query: user_text.to_string(),
            client_id: self.client_id.clone(),
        };

        match self.transport.start(&self.user_id, request).await? {
            Reply::Json(reply) => {
                debug!(name: "exchange.reply.json", "Resolved JSON reply");
                self.transcript
                    .replace(target, Message::assistant(reply.text()));
            }
            Reply::Stream(mut events) => {
                debug!(name: "exchange.reply.stream", "Consuming event stream");
                while let Some(event) = events.next().await {
                    self.apply(target, event?);
                }
                self.transcript.finalize(target);
            }
        }
        Ok(())
    }

    /// Apply one decoded event to the transcript and indicators.
    ///
    /// Payloads that lack the expected fields are ignored.
    pub fn apply(&self, target: MessageId, event: StreamEvent) {
        match event {
            StreamEvent::Delta { text } => {
                trace!(delta_length = text.len(), "Message delta");
                self.transcript.apply_delta(target, &text.replace('\r', ""));
            }
            StreamEvent::Done => {
                self.transcript.finalize(target);
            }
            StreamEvent::Named { name, payload } => match name.as_str() {
                "progress" => {
                    if let Some(pct) = progress_percent(&payload) {
                        trace!(percent = pct, "Progress update");
                        self.indicators.send_modify(|ind| ind.progress = Some(pct));
                    }
                }
                "assistant" => {
                    if let Some(text) = assistant_text(&payload) {
                        self.transcript.append_spaced(target, &text);
                    }
                }
                "error" => {
                    let text = error_text(&payload);
                    warn!(name: "exchange.stream_error", error = %text, "Backend reported stream error");
                    self.transcript.push(Message::assistant(format!(
                        "{ERROR_MARKER} Stream error: {text}"
                    )));
                }
                DONE_EVENT => {
                    self.transcript.finalize(target);
                }
                other => debug!(event = %other, "Ignoring unhandled stream event"),
            },
        }
    }
}

/// Releases the in-flight state of a controller when dropped.
struct InFlightGuard<'a> {
    controller: &'a ChatController,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(controller: &'a ChatController) -> Option<Self> {
        controller
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { controller })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let controller = self.controller;
        controller.transcript.end_exchange();
        controller.indicators.send_modify(|ind| {
            ind.typing = false;
            ind.progress = None;
        });
        controller.in_flight.store(false, Ordering::Release);
    }
}

/// Percentage from `{progress}` or `{params: {progress}}`, if it is a finite number.
fn progress_percent(payload: &Value) -> Option<i64> {
    let raw = payload
        .get("progress")
        .filter(|v| !v.is_null())
        .or_else(|| payload.pointer("/params/progress"))?;

    let ratio = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    ratio.is_finite().then(|| (ratio * 100.0).round() as i64)
}

/// Text parts of `{params: {data: [{type: "text", text}]}}`, space-joined.
fn assistant_text(payload: &Value) -> Option<String> {
    let parts = payload.pointer("/params/data")?.as_array()?;
    let joined = parts
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// The payload's `error` field, or the payload itself.
fn error_text(payload: &Value) -> String {
    match payload.get("error").filter(|v| !v.is_null()) {
        Some(error) => value_text(error),
        None => value_text(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::stream::decode;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Hands out prepared replies, optionally waiting for a signal first.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Reply>>>,
        requests: Mutex<Vec<(String, ConversationRequest)>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<Reply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn gated(gate: Arc<Notify>, replies: Vec<Result<Reply>>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(replies)
            }
        }
    }

    #[async_trait::async_trait]
    impl ConversationTransport for ScriptedTransport {
        async fn start(&self, user_id: &str, request: ConversationRequest) -> Result<Reply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap()
                .push((user_id.to_string(), request));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(Error::StreamUnavailable))
        }
    }

    fn json_reply(value: Value) -> Result<Reply> {
        Ok(Reply::Json(serde_json::from_value(value).unwrap()))
    }

    fn stream_reply(body: &str) -> Result<Reply> {
        let chunks: Vec<Result<Vec<u8>>> = vec![Ok(body.as_bytes().to_vec())];
        Ok(Reply::Stream(decode(futures::stream::iter(chunks))))
    }

    fn controller(transport: &Arc<ScriptedTransport>) -> ChatController {
        let transport: Arc<ScriptedTransport> = Arc::clone(transport);
        ChatController::new(transport, Transcript::new()).with_user_id("user-1")
    }

    fn named(name: &str, payload: Value) -> StreamEvent {
        StreamEvent::Named {
            name: name.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_json_reply_replaces_placeholder() {
        let transport = Arc::new(ScriptedTransport::new(vec![json_reply(
            json!({"llm_response": ["hi", "there"]}),
        )]));
        let controller = controller(&transport);

        assert_eq!(controller.send("hello").await, SendOutcome::Completed);

        let messages = controller.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::assistant("hi\n\nthere"));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].0, "user-1");
        assert_eq!(requests[0].1.user_query, "hello");
        assert_eq!(requests[0].1.client_id, None);
    }

    #[tokio::test]
    async fn test_stream_reply_concatenates_deltas() {
        let transport = Arc::new(ScriptedTransport::new(vec![stream_reply(
            "data: \"1\"\n\ndata: \"2\"\n\nevent: done\ndata: {}\n\n",
        )]));
        let controller = controller(&transport);

        assert_eq!(controller.send("count").await, SendOutcome::Completed);
        assert_eq!(controller.transcript().last().unwrap().content, "12");
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let transport = Arc::new(ScriptedTransport::default());
        let controller = controller(&transport);

        assert_eq!(
            controller.send(" \n\t").await,
            SendOutcome::Ignored(IgnoreReason::EmptyInput)
        );
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(controller.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_single_flight() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(ScriptedTransport::gated(
            Arc::clone(&gate),
            vec![json_reply(json!({"llm_response": "only once"}))],
        ));
        let controller = controller(&transport);

        let second = async {
            while !controller.is_in_flight() {
                tokio::task::yield_now().await;
            }
            assert!(controller.indicators().typing);
            let outcome = controller.send("two").await;
            gate.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(controller.send("one"), second);

        assert_eq!(first, SendOutcome::Completed);
        assert_eq!(second, SendOutcome::Ignored(IgnoreReason::InFlight));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            controller.transcript().snapshot(),
            vec![Message::user("one"), Message::assistant("only once")]
        );
        assert!(!controller.is_in_flight());
        assert_eq!(controller.indicators(), Indicators::default());
    }

    #[tokio::test]
    async fn test_failure_appends_error_and_resets_indicators() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(Error::Status {
            status: 500,
            message: "boom".to_string(),
        })]));
        let controller = controller(&transport);

        assert_eq!(controller.send("hello").await, SendOutcome::Failed);

        let messages = controller.transcript().snapshot();
        assert_eq!(messages.len(), 3);
        assert!(messages[1].is_placeholder());
        assert_eq!(messages[2].content, "⚠️ Error fetching reply: HTTP 500");
        assert_eq!(controller.indicators(), Indicators::default());
        assert_eq!(controller.transcript().stream_target(), None);

        // The controller is usable again.
        assert_eq!(
            controller.send("again").await,
            SendOutcome::Failed,
            "no scripted reply left"
        );
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_content() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: \"partial\"\n\n".to_vec()),
            Err(Error::Decode("connection reset".to_string())),
        ];
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(Reply::Stream(decode(
            futures::stream::iter(chunks),
        )))]));
        let controller = controller(&transport);

        assert_eq!(controller.send("q").await, SendOutcome::Failed);

        let messages = controller.transcript().snapshot();
        assert_eq!(messages[1].content, "partial");
        assert_eq!(
            messages[2].content,
            "⚠️ Error fetching reply: Stream read failed: connection reset"
        );
    }

    #[test]
    fn test_progress_clamped_for_display() {
        let controller = controller(&Arc::new(ScriptedTransport::default()));
        let target = controller.transcript().begin_exchange("q");

        controller.apply(target, named("progress", json!({"progress": 1.3})));
        assert_eq!(controller.indicators().progress, Some(130));
        assert_eq!(controller.indicators().progress_display(), Some(100));

        controller.apply(target, named("progress", json!({"params": {"progress": -0.2}})));
        assert_eq!(controller.indicators().progress_display(), Some(0));

        controller.apply(target, named("progress", json!({"params": {"progress": 0.426}})));
        assert_eq!(controller.indicators().progress_display(), Some(43));

        controller.apply(target, named("progress", json!({"progress": "abc"})));
        controller.apply(target, named("progress", json!("not an object")));
        controller.apply(target, named("progress", json!({"progress": null})));
        assert_eq!(controller.indicators().progress_display(), Some(43));

        controller.apply(target, named("progress", json!({"progress": "0.5"})));
        assert_eq!(controller.indicators().progress_display(), Some(50));
    }

    #[test]
    fn test_delta_strips_carriage_returns() {
        let controller = controller(&Arc::new(ScriptedTransport::default()));
        let target = controller.transcript().begin_exchange("q");

        for text in ["line one\r\n", "line two\r", "\r\nend"] {
            controller.apply(
                target,
                StreamEvent::Delta {
                    text: text.to_string(),
                },
            );
        }
        assert_eq!(
            controller.transcript().get(target).unwrap().content,
            "line one\nline two\nend"
        );
    }

    #[test]
    fn test_assistant_event_appends_text_parts() {
        let controller = controller(&Arc::new(ScriptedTransport::default()));
        let target = controller.transcript().begin_exchange("q");
        controller.apply(target, StreamEvent::Delta { text: "Found".to_string() });

        let payload = json!({"params": {"data": [
            {"type": "text", "text": " two "},
            {"type": "image", "text": "skip"},
            {"type": "text", "text": 3},
            {"type": "text", "text": "records"},
        ]}});
        controller.apply(target, named("assistant", payload));
        assert_eq!(
            controller.transcript().get(target).unwrap().content,
            "Found two  records"
        );

        controller.apply(target, named("assistant", json!({"params": {"data": []}})));
        controller.apply(target, named("assistant", json!({"unexpected": true})));
        assert_eq!(
            controller.transcript().get(target).unwrap().content,
            "Found two  records"
        );
    }

    #[test]
    fn test_error_event_appends_new_message() {
        let controller = controller(&Arc::new(ScriptedTransport::default()));
        let target = controller.transcript().begin_exchange("q");

        controller.apply(target, named("error", json!({"error": "backend down"})));
        controller.apply(target, named("error", json!("plain failure")));

        let messages = controller.transcript().snapshot();
        assert_eq!(messages[1].content, "");
        assert!(!messages[1].is_visible());
        assert_eq!(messages[2].content, "⚠️ Stream error: backend down");
        assert_eq!(messages[3].content, "⚠️ Stream error: plain failure");
    }

    #[test]
    fn test_done_trims_and_is_idempotent() {
        let controller = controller(&Arc::new(ScriptedTransport::default()));
        let target = controller.transcript().begin_exchange("q");
        controller.apply(target, StreamEvent::Delta { text: "answer \n\n".to_string() });

        controller.apply(target, StreamEvent::Done);
        controller.apply(target, named("done", json!({})));
        controller.transcript().finalize(target);

        assert_eq!(controller.transcript().get(target).unwrap().content, "answer");
    }

    #[test]
    fn test_unknown_event_is_noop() {
        let controller = controller(&Arc::new(ScriptedTransport::default()));
        let target = controller.transcript().begin_exchange("q");
        let before = controller.transcript().snapshot();

        controller.apply(target, named("telemetry", json!({"tokens": 12})));
        assert_eq!(controller.transcript().snapshot(), before);
        assert_eq!(controller.indicators(), Indicators::default());
    }
}
