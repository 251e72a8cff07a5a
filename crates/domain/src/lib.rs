//! Shared domain types for the Stagehand worker.
//!
//! Everything that crosses a crate boundary lives here: the agent/session
//! status machines, transcript/fact/card/glossary records, the push-bus
//! envelope, the worker configuration, and the shared error type.

pub mod agent;
pub mod card;
pub mod config;
pub mod error;
pub mod fact;
pub mod glossary;
pub mod push;
pub mod transcript;

pub use agent::{
    Agent, AgentSession, AgentStage, AgentStatus, AgentType, RuntimeStatus, SessionEventType,
    SessionStatus,
};
pub use card::{Card, CardKind, CardType, VisualRequest, VisualStrategy};
pub use config::Config;
pub use error::{Error, Result};
pub use fact::{Fact, FactStatus};
pub use glossary::GlossaryEntry;
pub use push::{PushKind, PushMessage};
pub use transcript::TranscriptChunk;
