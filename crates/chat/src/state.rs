/// Identifier for one streaming send.
///
/// This must change on every send so late events from a cancelled stream
/// can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamTicket(pub u64);

impl StreamTicket {
    /// Creates a typed stream ticket.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat lifecycle state for one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChatPhase {
    #[default]
    Idle,
    /// A session is being created before the stream can open.
    AwaitingSession,
    Streaming(StreamTicket),
    /// Terminal failure slot; holds the user-visible message until cleared.
    Failed(String),
}

/// State transition input for the chat lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    /// A send needs a session created first.
    BeginSessionSetup,
    /// The stream for this ticket is opening.
    BeginStream(StreamTicket),
    /// The backend delivered the final assistant message.
    CompleteStream(StreamTicket),
    /// The stream failed terminally.
    FailStream {
        ticket: StreamTicket,
        message: String,
    },
    /// The stream was cancelled locally; not a failure.
    CancelStream(StreamTicket),
    /// A non-stream operation failed while no stream was active.
    RecordFailure(String),
    /// The user dismissed the recorded failure.
    ClearFailure,
}

/// Rejection reason for illegal phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseRejection {
    StreamActive {
        active: StreamTicket,
    },
    NoActiveStream,
    TicketMismatch {
        active: StreamTicket,
        attempted: StreamTicket,
    },
    NoFailureRecorded,
}

pub type PhaseResult = Result<ChatPhase, PhaseRejection>;

impl ChatPhase {
    /// Returns true when incoming stream events for this ticket may still
    /// mutate state.
    pub fn accepts_event(&self, ticket: StreamTicket) -> bool {
        matches!(self, Self::Streaming(active) if *active == ticket)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    /// The recorded failure message, when in the failed state.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            Self::Idle | Self::AwaitingSession | Self::Streaming(_) => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// Starting a stream requires no stream to be active; callers cancel the
    /// previous stream first. Terminal transitions must carry the active
    /// ticket exactly.
    pub fn apply(&self, transition: PhaseTransition) -> PhaseResult {
        match transition {
            PhaseTransition::BeginSessionSetup => self.apply_non_streaming(Self::AwaitingSession),
            PhaseTransition::BeginStream(ticket) => {
                self.apply_non_streaming(Self::Streaming(ticket))
            }
            PhaseTransition::CompleteStream(ticket) => self.apply_terminal(ticket, Self::Idle),
            PhaseTransition::FailStream { ticket, message } => {
                self.apply_terminal(ticket, Self::Failed(message))
            }
            PhaseTransition::CancelStream(ticket) => self.apply_terminal(ticket, Self::Idle),
            PhaseTransition::RecordFailure(message) => {
                self.apply_non_streaming(Self::Failed(message))
            }
            PhaseTransition::ClearFailure => match self {
                Self::Failed(_) => Ok(Self::Idle),
                Self::Idle | Self::AwaitingSession | Self::Streaming(_) => {
                    Err(PhaseRejection::NoFailureRecorded)
                }
            },
        }
    }

    fn apply_non_streaming(&self, next: Self) -> PhaseResult {
        match self {
            Self::Streaming(active) => Err(PhaseRejection::StreamActive { active: *active }),
            Self::Idle | Self::AwaitingSession | Self::Failed(_) => Ok(next),
        }
    }

    fn apply_terminal(&self, ticket: StreamTicket, next: Self) -> PhaseResult {
        match self {
            Self::Streaming(active) if *active == ticket => Ok(next),
            Self::Streaming(active) => Err(PhaseRejection::TicketMismatch {
                active: *active,
                attempted: ticket,
            }),
            Self::Idle | Self::AwaitingSession | Self::Failed(_) => {
                Err(PhaseRejection::NoActiveStream)
            }
        }
    }
}
