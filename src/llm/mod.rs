//! LLM client abstraction.
//!
//! The engine is deliberately narrow here: it consumes a single
//! [`LlmClient`] trait (spec §6.3) and never depends on a concrete provider.
//! `gateway` builds the Sub-Model Gateway (C2) on top of the same trait.

mod client;
mod gateway;

pub use client::{ChatMessage, ChatRole, LlmClient, LlmCompletion};
pub use gateway::SubModelGateway;
