use openbase_api::{ChatMessage, ChatSession};

/// Notification delivered to orchestrator subscribers.
///
/// Updates describe what changed; subscribers read current state back from
/// the orchestrator when they need more than the carried payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    /// The session catalog was replaced.
    RosterChanged,
    /// The active session changed; the transcript was replaced alongside.
    ActiveSessionChanged(Option<ChatSession>),
    /// A fresh transcript finished loading for the active session.
    TranscriptLoaded,
    /// One message was appended to the transcript.
    MessageAppended(ChatMessage),
    /// Incremental streamed text; append semantics.
    StreamChunk(String),
    /// The active stream resolved with its final message.
    StreamFinished,
    /// The active stream failed; the message is also held in the error slot.
    StreamFailed(String),
    /// The active stream was aborted. `materialized` reports whether a
    /// partial assistant message was appended.
    StreamAborted { materialized: bool },
    /// A non-stream operation failed; the message is held in the error slot.
    FailureRecorded(String),
    /// The error slot was cleared.
    FailureCleared,
}
