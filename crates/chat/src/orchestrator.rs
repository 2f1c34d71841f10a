use std::sync::Arc;

use chrono::Utc;
use openbase_api::stream::SendEventStream;
use openbase_api::{ChatMessage, ChatRole, ChatSession, CoderClient, SendStreamHandle, StreamEvent};
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::events::ChatUpdate;
use crate::state::{ChatPhase, PhaseTransition, StreamTicket};
use crate::store::{SessionRoster, Transcript};

/// Marker appended to a partial reply when the user aborts mid-stream.
const ABORT_MARKER: &str = "\n\n[Response aborted]";

/// Composes the session roster, transcript, streaming buffer, and stream
/// client into the externally visible chat behavior.
///
/// One orchestrator per chat surface; there are no process-wide singletons.
/// State is observable through [`ChatOrchestrator::subscribe`] plus the
/// snapshot accessors.
pub struct ChatOrchestrator {
    client: CoderClient,
    core: Arc<Mutex<ChatCore>>,
}

impl ChatOrchestrator {
    pub fn new(client: CoderClient) -> Self {
        Self {
            client,
            core: Arc::new(Mutex::new(ChatCore::default())),
        }
    }

    /// Registers an observer. Updates are delivered in mutation order.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatUpdate> {
        self.core.lock().await.subscribe()
    }

    /// Initial load: fetch the roster and activate the most recent session.
    pub async fn bootstrap(&self) {
        match self.client.list_sessions().await {
            Ok(sessions) => {
                let most_recent = sessions.first().cloned();
                let pending = {
                    let mut core = self.core.lock().await;
                    core.replace_roster(sessions);
                    most_recent.map(|session| {
                        let session_id = session.id.clone();
                        core.activate_session(session);
                        (session_id, core.bump_fetch_epoch())
                    })
                };

                if let Some((session_id, epoch)) = pending {
                    self.load_transcript(&session_id, epoch).await;
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to load sessions");
                self.core
                    .lock()
                    .await
                    .record_failure(format!("failed to load sessions: {error}"));
            }
        }
    }

    /// Sends one user message over a fresh stream.
    ///
    /// Whitespace-only text is a no-op. When no session is active one is
    /// created first. A previous in-flight send is cancelled before the new
    /// stream opens; its late events cannot mutate state.
    pub async fn send_message(&self, text: &str) {
        let content = text.trim();
        if content.is_empty() {
            return;
        }

        let existing_session = {
            let mut core = self.core.lock().await;
            core.cancel_stream_silently();
            core.roster.active().map(|session| session.id.clone())
        };

        let session_id = match existing_session {
            Some(session_id) => session_id,
            None => {
                self.core.lock().await.begin_session_setup();
                match self.client.create_session(None).await {
                    Ok(session) => {
                        let mut core = self.core.lock().await;
                        let session_id = session.id.clone();
                        core.adopt_session(session);
                        session_id
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "failed to create session for send");
                        self.core
                            .lock()
                            .await
                            .record_failure(format!("failed to create session: {error}"));
                        return;
                    }
                }
            }
        };

        let ticket = { self.core.lock().await.begin_stream() };

        let SendStreamHandle { stream, worker } =
            self.client.open_send_stream(&session_id, content);
        tokio::spawn(worker);
        let reader = tokio::spawn(run_stream_reader(Arc::clone(&self.core), ticket, stream));
        self.core
            .lock()
            .await
            .attach_reader(ticket, reader.abort_handle());
    }

    /// Aborts the in-flight send, if any.
    ///
    /// A non-empty streaming buffer is materialized into a synthetic
    /// assistant message marked `{aborted: true}`. The server-side stop
    /// signal is sent best-effort afterwards; local cancellation never
    /// depends on it.
    pub async fn abort(&self) {
        let aborted = { self.core.lock().await.abort_stream() };
        if !aborted {
            return;
        }

        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(error) = client.request_abort().await {
                tracing::warn!(error = %error, "server-side abort request failed");
            }
        });
    }

    /// Activates another session and reloads its transcript.
    ///
    /// Any active stream is cancelled first, discarding its buffer: the
    /// user navigated away rather than pressed stop. Stale transcript
    /// fetches from a superseded switch are discarded on arrival.
    pub async fn switch_session(&self, session_id: &str) {
        let known = {
            let mut core = self.core.lock().await;
            core.cancel_stream_silently();
            core.roster.find(session_id).cloned()
        };

        let session = match known {
            Some(session) => session,
            None => match self.client.get_session(session_id).await {
                Ok(session) => session,
                Err(error) => {
                    let message = if error.is_not_found() {
                        format!("session '{session_id}' was not found")
                    } else {
                        format!("failed to load session: {error}")
                    };
                    tracing::error!(session_id = %session_id, error = %error, "failed to switch session");
                    self.core.lock().await.record_failure(message);
                    return;
                }
            },
        };

        let epoch = {
            let mut core = self.core.lock().await;
            core.activate_session(session);
            core.bump_fetch_epoch()
        };
        self.load_transcript(session_id, epoch).await;
    }

    /// Creates a session, inserts it at the head of the roster, and makes
    /// it active with an empty transcript.
    pub async fn create_session(&self, name: Option<&str>) {
        match self.client.create_session(name).await {
            Ok(session) => {
                self.core.lock().await.adopt_session(session);
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to create session");
                self.core
                    .lock()
                    .await
                    .record_failure(format!("failed to create session: {error}"));
            }
        }
    }

    /// Refetches the session catalog without touching the active session.
    pub async fn refresh_sessions(&self) {
        match self.client.list_sessions().await {
            Ok(sessions) => {
                self.core.lock().await.replace_roster(sessions);
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to refresh sessions");
                self.core
                    .lock()
                    .await
                    .record_failure(format!("failed to load sessions: {error}"));
            }
        }
    }

    pub async fn clear_error(&self) {
        self.core.lock().await.clear_failure();
    }

    pub async fn phase(&self) -> ChatPhase {
        self.core.lock().await.phase.clone()
    }

    pub async fn is_streaming(&self) -> bool {
        self.core.lock().await.phase.is_streaming()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.core.lock().await.phase.failure().map(str::to_string)
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.core.lock().await.transcript.messages().to_vec()
    }

    pub async fn sessions(&self) -> Vec<ChatSession> {
        self.core.lock().await.roster.sessions().to_vec()
    }

    pub async fn active_session(&self) -> Option<ChatSession> {
        self.core.lock().await.roster.active().cloned()
    }

    /// The in-progress assistant reply accumulated so far.
    pub async fn streaming_buffer(&self) -> String {
        self.core.lock().await.buffer.clone()
    }

    async fn load_transcript(&self, session_id: &str, epoch: u64) {
        match self.client.list_messages(session_id).await {
            Ok(messages) => {
                let mut core = self.core.lock().await;
                if core.fetch_epoch == epoch {
                    core.replace_transcript(messages);
                } else {
                    tracing::debug!(session_id = %session_id, "discarding stale transcript fetch");
                }
            }
            Err(error) => {
                tracing::error!(session_id = %session_id, error = %error, "failed to load transcript");
                let mut core = self.core.lock().await;
                if core.fetch_epoch == epoch {
                    core.record_failure(format!("failed to load messages: {error}"));
                }
            }
        }
    }
}

/// Forwards stream events into the core until a terminal event or hang-up.
async fn run_stream_reader(
    core: Arc<Mutex<ChatCore>>,
    ticket: StreamTicket,
    mut stream: SendEventStream,
) {
    while let Some(event) = stream.recv().await {
        let terminal = { core.lock().await.apply_stream_event(ticket, event) };
        if terminal {
            return;
        }
    }

    core.lock().await.handle_stream_closed(ticket);
}

struct ReaderHandle {
    ticket: StreamTicket,
    abort: AbortHandle,
}

/// All orchestrator state behind one lock. Pure mutations, no I/O, so the
/// behavior is testable by driving it with synthetic events.
#[derive(Default)]
struct ChatCore {
    roster: SessionRoster,
    transcript: Transcript,
    buffer: String,
    phase: ChatPhase,
    next_ticket: u64,
    fetch_epoch: u64,
    reader: Option<ReaderHandle>,
    subscribers: Vec<mpsc::UnboundedSender<ChatUpdate>>,
}

impl ChatCore {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ChatUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, update: ChatUpdate) {
        self.subscribers
            .retain(|subscriber| subscriber.send(update.clone()).is_ok());
    }

    /// Applies a phase transition, keeping the current phase on rejection.
    fn transition(&mut self, transition: PhaseTransition) -> bool {
        match self.phase.apply(transition) {
            Ok(next) => {
                self.phase = next;
                true
            }
            Err(rejection) => {
                tracing::debug!(?rejection, "phase transition rejected");
                false
            }
        }
    }

    fn begin_session_setup(&mut self) {
        self.transition(PhaseTransition::BeginSessionSetup);
    }

    /// Opens a new stream slot. Callers cancel any active stream first.
    fn begin_stream(&mut self) -> StreamTicket {
        self.next_ticket += 1;
        let ticket = StreamTicket::new(self.next_ticket);
        self.buffer.clear();
        self.transition(PhaseTransition::BeginStream(ticket));
        ticket
    }

    fn attach_reader(&mut self, ticket: StreamTicket, abort: AbortHandle) {
        if self.phase.accepts_event(ticket) {
            self.reader = Some(ReaderHandle { ticket, abort });
        } else {
            // The stream already resolved before the handle arrived.
            abort.abort();
        }
    }

    fn detach_reader(&mut self, ticket: StreamTicket) {
        if let Some(reader) = self.reader.take() {
            if reader.ticket == ticket {
                reader.abort.abort();
            } else {
                self.reader = Some(reader);
            }
        }
    }

    /// Applies one stream event; returns true when the stream is finished.
    fn apply_stream_event(&mut self, ticket: StreamTicket, event: StreamEvent) -> bool {
        if !self.phase.accepts_event(ticket) {
            tracing::debug!(ticket = ticket.0, "dropping stream event from a stale send");
            return true;
        }

        match event {
            StreamEvent::UserMessage(message) => {
                self.transcript.push(message.clone());
                self.emit(ChatUpdate::MessageAppended(message));
                false
            }
            StreamEvent::ResponseChunk(chunk) | StreamEvent::ErrorChunk(chunk) => {
                self.buffer.push_str(&chunk);
                self.emit(ChatUpdate::StreamChunk(chunk));
                false
            }
            StreamEvent::Completion(payload) => {
                // The authoritative final message replaces whatever the
                // buffer accumulated.
                self.buffer.clear();
                self.reader = None;
                self.transition(PhaseTransition::CompleteStream(ticket));
                let message = payload.assistant_response;
                self.transcript.push(message.clone());
                self.emit(ChatUpdate::MessageAppended(message));
                self.emit(ChatUpdate::StreamFinished);
                true
            }
            StreamEvent::Error(payload) => {
                self.buffer.clear();
                self.reader = None;
                self.transition(PhaseTransition::FailStream {
                    ticket,
                    message: payload.error.clone(),
                });
                self.emit(ChatUpdate::StreamFailed(payload.error));
                true
            }
            StreamEvent::Keepalive => false,
        }
    }

    /// The worker hung up without a terminal event.
    fn handle_stream_closed(&mut self, ticket: StreamTicket) {
        if !self.phase.accepts_event(ticket) {
            return;
        }

        let message = "response stream ended before completion".to_string();
        tracing::warn!(ticket = ticket.0, "{message}");
        self.buffer.clear();
        self.reader = None;
        self.transition(PhaseTransition::FailStream {
            ticket,
            message: message.clone(),
        });
        self.emit(ChatUpdate::StreamFailed(message));
    }

    /// User-initiated abort: materializes a non-empty buffer into a
    /// synthetic assistant message. Returns true when a stream was active.
    fn abort_stream(&mut self) -> bool {
        let ChatPhase::Streaming(ticket) = &self.phase else {
            return false;
        };
        let ticket = *ticket;

        self.detach_reader(ticket);
        self.transition(PhaseTransition::CancelStream(ticket));

        let materialized = !self.buffer.is_empty();
        if materialized {
            let session_id = self
                .roster
                .active_id()
                .unwrap_or_default()
                .to_string();
            let message = aborted_message(session_id, &self.buffer);
            self.buffer.clear();
            self.transcript.push(message.clone());
            self.emit(ChatUpdate::MessageAppended(message));
        }

        self.emit(ChatUpdate::StreamAborted { materialized });
        true
    }

    /// Cancels without materializing; used when a new send or a session
    /// switch supersedes the active stream.
    fn cancel_stream_silently(&mut self) -> bool {
        let ChatPhase::Streaming(ticket) = &self.phase else {
            return false;
        };
        let ticket = *ticket;

        self.detach_reader(ticket);
        self.buffer.clear();
        self.transition(PhaseTransition::CancelStream(ticket))
    }

    fn record_failure(&mut self, message: String) {
        if self.phase.is_streaming() {
            // A side operation failed mid-stream; the stream itself is fine.
            tracing::warn!(error = %message, "ignoring non-stream failure while streaming");
            return;
        }

        if self.transition(PhaseTransition::RecordFailure(message.clone())) {
            self.emit(ChatUpdate::FailureRecorded(message));
        }
    }

    fn clear_failure(&mut self) {
        if self.transition(PhaseTransition::ClearFailure) {
            self.emit(ChatUpdate::FailureCleared);
        }
    }

    fn adopt_session(&mut self, session: ChatSession) {
        self.roster.adopt(session.clone());
        self.transcript.clear();
        self.emit(ChatUpdate::RosterChanged);
        self.emit(ChatUpdate::ActiveSessionChanged(Some(session)));
    }

    fn activate_session(&mut self, session: ChatSession) {
        self.roster.set_active(session.clone());
        self.transcript.clear();
        self.emit(ChatUpdate::ActiveSessionChanged(Some(session)));
    }

    fn replace_roster(&mut self, sessions: Vec<ChatSession>) {
        self.roster.replace(sessions);
        self.emit(ChatUpdate::RosterChanged);
    }

    fn replace_transcript(&mut self, messages: Vec<ChatMessage>) {
        self.transcript.replace(messages);
        self.emit(ChatUpdate::TranscriptLoaded);
    }

    fn bump_fetch_epoch(&mut self) -> u64 {
        self.fetch_epoch += 1;
        self.fetch_epoch
    }
}

/// Synthesizes the transcript entry for an aborted partial reply.
fn aborted_message(session_id: String, partial: &str) -> ChatMessage {
    ChatMessage {
        id: format!("aborted-{}", Uuid::new_v4()),
        session_id,
        content: format!("{partial}{ABORT_MARKER}"),
        role: ChatRole::Assistant,
        metadata: serde_json::json!({ "aborted": true }),
        claude_response: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use openbase_api::stream::{CompletionPayload, ErrorPayload};

    use super::*;

    fn session(id: &str) -> ChatSession {
        ChatSession {
            id: id.to_string(),
            name: String::new(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn assistant_message(id: &str, session_id: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            session_id: session_id.to_string(),
            content: content.to_string(),
            role: ChatRole::Assistant,
            metadata: serde_json::json!({}),
            claude_response: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    fn streaming_core() -> (ChatCore, StreamTicket) {
        let mut core = ChatCore::default();
        core.adopt_session(session("s1"));
        let ticket = core.begin_stream();
        (core, ticket)
    }

    #[test]
    fn chunks_accumulate_in_arrival_order() {
        let (mut core, ticket) = streaming_core();

        core.apply_stream_event(ticket, StreamEvent::ResponseChunk("He".to_string()));
        core.apply_stream_event(ticket, StreamEvent::ErrorChunk("llo".to_string()));
        core.apply_stream_event(ticket, StreamEvent::ResponseChunk(" wor".to_string()));

        assert_eq!(core.buffer, "Hello wor");
        assert!(core.phase.is_streaming());
    }

    #[test]
    fn abort_materializes_a_non_empty_buffer() {
        let (mut core, ticket) = streaming_core();
        core.apply_stream_event(ticket, StreamEvent::ResponseChunk("Hello wor".to_string()));

        assert!(core.abort_stream());

        let appended = core.transcript.messages().last().unwrap();
        assert_eq!(appended.content, "Hello wor\n\n[Response aborted]");
        assert_eq!(appended.role, ChatRole::Assistant);
        assert!(appended.is_aborted());
        assert!(appended.id.starts_with("aborted-"));
        assert_eq!(appended.session_id, "s1");
        assert!(core.buffer.is_empty());
        assert_eq!(core.phase, ChatPhase::Idle);
    }

    #[test]
    fn abort_with_an_empty_buffer_appends_nothing() {
        let (mut core, ticket) = streaming_core();
        let before = core.transcript.len();
        let _ = ticket;

        assert!(core.abort_stream());
        assert_eq!(core.transcript.len(), before);
        assert_eq!(core.phase, ChatPhase::Idle);
    }

    #[test]
    fn completion_overrides_the_accumulated_buffer() {
        let (mut core, ticket) = streaming_core();
        core.apply_stream_event(ticket, StreamEvent::ResponseChunk("partial".to_string()));

        let terminal = core.apply_stream_event(
            ticket,
            StreamEvent::Completion(CompletionPayload {
                assistant_response: assistant_message("m2", "s1", "full final text"),
            }),
        );

        assert!(terminal);
        assert_eq!(
            core.transcript.messages().last().unwrap().content,
            "full final text"
        );
        assert!(core.buffer.is_empty());
        assert_eq!(core.phase, ChatPhase::Idle);
    }

    #[test]
    fn late_events_from_a_cancelled_stream_are_dropped() {
        let (mut core, stale) = streaming_core();
        core.cancel_stream_silently();
        let fresh = core.begin_stream();

        let terminal =
            core.apply_stream_event(stale, StreamEvent::ResponseChunk("late".to_string()));

        assert!(terminal, "stale events must stop their reader");
        assert!(core.buffer.is_empty());
        assert!(core.phase.accepts_event(fresh));
    }

    #[test]
    fn stream_error_discards_the_buffer_and_records_the_message() {
        let (mut core, ticket) = streaming_core();
        core.apply_stream_event(ticket, StreamEvent::ResponseChunk("partial".to_string()));

        core.apply_stream_event(
            ticket,
            StreamEvent::Error(ErrorPayload {
                error: "backend exploded".to_string(),
            }),
        );

        assert!(core.buffer.is_empty());
        assert_eq!(core.phase.failure(), Some("backend exploded"));

        core.clear_failure();
        assert_eq!(core.phase, ChatPhase::Idle);
    }

    #[test]
    fn hang_up_without_completion_is_a_failure() {
        let (mut core, ticket) = streaming_core();
        core.apply_stream_event(ticket, StreamEvent::ResponseChunk("partial".to_string()));

        core.handle_stream_closed(ticket);

        assert!(core.buffer.is_empty());
        assert_eq!(
            core.phase.failure(),
            Some("response stream ended before completion")
        );
    }

    #[test]
    fn subscribers_observe_the_send_lifecycle() {
        let mut core = ChatCore::default();
        let mut updates = core.subscribe();
        core.adopt_session(session("s1"));
        let ticket = core.begin_stream();

        core.apply_stream_event(ticket, StreamEvent::ResponseChunk("He".to_string()));
        core.apply_stream_event(
            ticket,
            StreamEvent::Completion(CompletionPayload {
                assistant_response: assistant_message("m1", "s1", "Hello"),
            }),
        );

        let mut seen = Vec::new();
        while let Ok(update) = updates.try_recv() {
            seen.push(update);
        }

        assert!(matches!(seen[0], ChatUpdate::RosterChanged));
        assert!(matches!(seen[1], ChatUpdate::ActiveSessionChanged(Some(_))));
        assert!(
            seen.iter()
                .any(|update| matches!(update, ChatUpdate::StreamChunk(chunk) if chunk == "He"))
        );
        assert!(matches!(seen.last(), Some(ChatUpdate::StreamFinished)));
    }

    #[tokio::test]
    async fn whitespace_only_send_is_a_no_op() {
        let client = CoderClient::new(reqwest::Client::new(), "http://127.0.0.1:9/api/coder");
        let orchestrator = ChatOrchestrator::new(client);

        orchestrator.send_message("   \n\t ").await;

        assert_eq!(orchestrator.phase().await, ChatPhase::Idle);
        assert!(orchestrator.messages().await.is_empty());
    }
}
