//! Bounded in-memory state owned by each event runtime.
//!
//! None of these suspend: they are plain data structures mutated only on
//! the runtime's actor task. Durable reconciliation (evictions, prunes)
//! happens in the command handlers that call them.

pub mod cards;
pub mod facts;
pub mod glossary;
pub mod pending;
pub mod ring;

pub use cards::CardsStore;
pub use facts::{FactsStats, FactsStore, UpsertOutcome};
pub use glossary::GlossaryCache;
pub use pending::{PendingCardConcepts, PendingConcept};
pub use ring::{RingBuffer, RingStats};
