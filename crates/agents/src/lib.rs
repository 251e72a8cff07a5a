//! Per-agent glue: policy prompts, the tool surface exposed to the
//! model, turn-input assembly, output parsing, and concept extraction.
//!
//! Handlers here are pure over their inputs — the worker runtime owns
//! the stores and feeds prepared context blocks in, so everything in
//! this crate is unit-testable without a runtime.

pub mod cards;
pub mod concepts;
pub mod facts;
pub mod prompts;
pub mod tools;
pub mod turn;

pub use cards::{parse_produce_card, CardParseError};
pub use concepts::{count_concept_occurrences, extract_concepts, ConceptCandidate, ConceptSource};
pub use facts::{parse_facts_response, FactUpdate};
pub use prompts::PromptLibrary;
pub use tools::{agent_tool_specs, ToolDispatcher, PRODUCE_CARD_TOOL, RETRIEVE_TOOL};
pub use turn::{cards_turn_input, facts_turn_input, SupportingContext};
