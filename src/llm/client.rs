//! Narrow `LlmClient` trait (spec §6.3).
//!
//! One operation: `complete(model, messages) -> {text, prompt_tokens,
//! completion_tokens}`. Implementations may be mocks, local inference, or
//! remote providers; the engine requires only that errors are raisable and
//! that token counts are reported or synthesizable as zero. No concrete
//! provider ships with this crate — that glue lives outside the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The result of one `complete` call.
#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Consumed, not specified: the engine binds this trait once for the main
/// loop (C4) and again for the sub-model gateway (C2) — they may be the same
/// client or two different ones.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<LlmCompletion>;
}
