use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::types::ChatMessage;

/// One decoded record from the send-to-claude event stream.
///
/// The wire shape is a `data: <json>` line per record, where `<json>` is an
/// adjacently tagged `{type, data}` object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Echo of the persisted user message that opened this exchange.
    UserMessage(ChatMessage),
    /// Incremental assistant text; append semantics.
    ResponseChunk(String),
    /// Incremental error text, accumulated exactly like response text so
    /// partial error output is visible mid-stream.
    ErrorChunk(String),
    /// Terminal: the authoritative persisted assistant message.
    Completion(CompletionPayload),
    /// Terminal: backend-reported failure.
    Error(ErrorPayload),
    /// Connection hold-open; never forwarded past the stream client.
    Keepalive,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionPayload {
    pub assistant_response: ChatMessage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl StreamEvent {
    /// Terminal events end the stream; nothing meaningful follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion(_) | Self::Error(_))
    }
}

pub type SendWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving half of one streaming send call.
///
/// Dropping the stream cancels the worker, which in turn drops the in-flight
/// request and aborts the connection.
pub struct SendEventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl SendEventStream {
    fn new(events: mpsc::UnboundedReceiver<StreamEvent>, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Awaits the next event; `None` once the worker has stopped and the
    /// channel is drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }

    /// Cancels the in-flight send. Returns false when the worker already
    /// observed a previous cancellation or finished on its own.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for SendEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Pairs the event stream with the worker future that feeds it. The caller
/// decides where the worker runs (usually `tokio::spawn`).
pub struct SendStreamHandle {
    pub stream: SendEventStream,
    pub worker: SendWorker,
}

pub(crate) fn open_send_stream(
    http: reqwest::Client,
    url: String,
    session_id: &str,
    content: &str,
) -> SendStreamHandle {
    let payload = serde_json::json!({
        "session_id": session_id,
        "content": content,
        "role": "user",
        "metadata": {},
    });

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let stream = SendEventStream::new(event_rx, cancel_tx);
    let worker: SendWorker = Box::pin(run_send_worker(http, url, payload, event_tx, cancel_rx));

    SendStreamHandle { stream, worker }
}

async fn run_send_worker(
    http: reqwest::Client,
    url: String,
    payload: serde_json::Value,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let request = http.post(&url).json(&payload).send();

    let response = tokio::select! {
        _ = &mut cancel_rx => {
            tracing::debug!(url = %url, "send cancelled before the request completed");
            return;
        }
        sent = request => match sent {
            Ok(response) => response,
            Err(source) => {
                tracing::error!(url = %url, error = %source, "failed to open send stream");
                emit_error(&event_tx, format!("failed to open send stream: {source}"));
                return;
            }
        }
    };

    let status = response.status();
    if !status.is_success() {
        // The backend reports pre-stream failures through the response body.
        let body = response.text().await.unwrap_or_default();
        tracing::error!(url = %url, status = status.as_u16(), "send rejected before streaming");
        emit_error(
            &event_tx,
            format!("send failed with status {}: {body}", status.as_u16()),
        );
        return;
    }

    let mut body_stream = response.bytes_stream();
    let mut assembler = LineAssembler::default();

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(url = %url, "send stream cancelled");
                return;
            }
            chunk = body_stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for line in assembler.push(&bytes) {
                        let Some(event) = decode_event_line(&line) else {
                            continue;
                        };
                        if matches!(event, StreamEvent::Keepalive) {
                            continue;
                        }

                        let terminal = event.is_terminal();
                        if event_tx.send(event).is_err() || terminal {
                            return;
                        }
                    }
                }
                Some(Err(source)) => {
                    tracing::warn!(url = %url, error = %source, "send stream transport failure");
                    emit_error(&event_tx, format!("stream transport failed: {source}"));
                    return;
                }
                // Clean hang-up without a terminal event; the reader observes
                // the channel closing and decides what that means.
                None => return,
            }
        }
    }
}

fn emit_error(event_tx: &mpsc::UnboundedSender<StreamEvent>, message: String) {
    let _ = event_tx.send(StreamEvent::Error(ErrorPayload { error: message }));
}

/// Accumulates raw body bytes and yields only complete `\n`-terminated
/// lines, carrying the unterminated tail across chunks.
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        lines
    }
}

/// Decodes one complete line from the event stream.
///
/// Lines without the `data: ` prefix are ignored; a line whose JSON fails to
/// decode is logged and skipped without ending the stream.
pub(crate) fn decode_event_line(line: &str) -> Option<StreamEvent> {
    let payload = line.trim().strip_prefix("data: ")?;
    if payload.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(line = %line, error = %error, "skipping undecodable stream event line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatRole;

    fn decode_all(assembler: &mut LineAssembler, bytes: &[u8]) -> Vec<StreamEvent> {
        assembler
            .push(bytes)
            .iter()
            .filter_map(|line| decode_event_line(line))
            .collect()
    }

    #[test]
    fn chunks_concatenate_in_arrival_order() {
        let mut assembler = LineAssembler::default();
        let body = b"data: {\"type\":\"response_chunk\",\"data\":\"He\"}\n\
                     data: {\"type\":\"error_chunk\",\"data\":\"ll\"}\n\
                     data: {\"type\":\"response_chunk\",\"data\":\"o\"}\n";

        let mut buffer = String::new();
        for event in decode_all(&mut assembler, body) {
            match event {
                StreamEvent::ResponseChunk(text) | StreamEvent::ErrorChunk(text) => {
                    buffer.push_str(&text);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        assert_eq!(buffer, "Hello");
    }

    #[test]
    fn partial_lines_are_carried_across_pushes() {
        let mut assembler = LineAssembler::default();

        assert!(assembler.push(b"data: {\"type\":\"resp").is_empty());
        assert!(assembler.push(b"onse_chunk\",\"data\":\"ok\"}").is_empty());

        let events = decode_all(&mut assembler, b"\n");
        assert_eq!(events, vec![StreamEvent::ResponseChunk("ok".to_string())]);
    }

    #[test]
    fn malformed_line_is_skipped_without_poisoning_the_stream() {
        let mut assembler = LineAssembler::default();
        let body = b"data: {not valid json\n\
                     data: {\"type\":\"response_chunk\",\"data\":\"ok\"}\n";

        let events = decode_all(&mut assembler, body);
        assert_eq!(events, vec![StreamEvent::ResponseChunk("ok".to_string())]);
    }

    #[test]
    fn non_data_and_blank_lines_are_ignored() {
        assert_eq!(decode_event_line(""), None);
        assert_eq!(decode_event_line(": comment"), None);
        assert_eq!(decode_event_line("data: "), None);
        assert_eq!(decode_event_line("event: message"), None);
    }

    #[test]
    fn keepalive_decodes_without_a_data_field() {
        let event = decode_event_line(r#"data: {"type":"keepalive"}"#);
        assert_eq!(event, Some(StreamEvent::Keepalive));
    }

    #[test]
    fn completion_carries_the_assistant_message() {
        let line = r#"data: {"type":"completion","data":{"assistant_response":{
            "id":"m2","session_id":"s1","content":"Hello","role":"assistant",
            "metadata":{},"claude_response":{},"created_at":"2025-06-01T10:00:00Z"}}}"#
            .replace('\n', "");

        let event = decode_event_line(&line).expect("completion should decode");
        assert!(event.is_terminal());
        match event {
            StreamEvent::Completion(payload) => {
                assert_eq!(payload.assistant_response.content, "Hello");
                assert_eq!(payload.assistant_response.role, ChatRole::Assistant);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_event_is_terminal() {
        let event = decode_event_line(r#"data: {"type":"error","data":{"error":"boom"}}"#)
            .expect("error should decode");
        assert_eq!(
            event,
            StreamEvent::Error(ErrorPayload {
                error: "boom".to_string()
            })
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut assembler = LineAssembler::default();
        let events = decode_all(
            &mut assembler,
            b"data: {\"type\":\"response_chunk\",\"data\":\"ok\"}\r\n",
        );
        assert_eq!(events, vec![StreamEvent::ResponseChunk("ok".to_string())]);
    }
}
