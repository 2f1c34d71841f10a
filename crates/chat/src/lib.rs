pub mod events;
pub mod orchestrator;
pub mod state;
pub mod store;

pub use events::ChatUpdate;
pub use orchestrator::ChatOrchestrator;
pub use state::{ChatPhase, PhaseRejection, PhaseTransition, StreamTicket};
pub use store::{SessionRoster, Transcript};
