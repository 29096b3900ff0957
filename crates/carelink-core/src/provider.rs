use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::models::{ChatMessage, MessageRole};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One prior exchange handed to the provider after the system prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for ChatTurn {
    /// Doctor turns are the assistant's voice; everything else is user input.
    fn from(message: &ChatMessage) -> Self {
        match message.role {
            MessageRole::Doctor => Self::assistant(message.content.clone()),
            MessageRole::Patient | MessageRole::System => Self::user(message.content.clone()),
        }
    }
}

/// A single completion call.
#[derive(Clone, Debug)]
pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [ChatTurn],
    /// Overrides the provider's configured sampling temperature.
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(system_prompt: &'a str, history: &'a [ChatTurn], timeout: Duration) -> Self {
        Self {
            system_prompt,
            history,
            temperature: None,
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A generative text service. Exactly one is active per deployment.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Return the assistant text for the request, or fail. Implementations
    /// must not run past `request.timeout`.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError>;
}
