//! Challenge dialogue with an unknown person
//!
//! A session speaks the opening challenge, then alternates listen, respond,
//! and speak until one of:
//!
//! - the turn limit is reached or the responder sends the close cue (Completed)
//! - the visitor stays silent twice in a row (`TimedOut`)
//! - quit or guard-off is spoken, the guard cancels it, or the responder
//!   fails (Aborted)

mod incident;
mod manager;
pub mod responder;
mod session;

pub use incident::IncidentLog;
pub use manager::{ConversationManager, FINAL_WARNING};
pub use responder::{ChatContext, ChatResponder, OpenAiResponder, Reply, RuleResponder};
pub use session::{ConversationSession, EndReason, SessionStatus, Speaker, TranscriptLine};
