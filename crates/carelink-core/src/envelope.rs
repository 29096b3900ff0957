//! The `{type, action, payload}` unit routed through the hub.
//!
//! The wire shape is a flat JSON object whose `type` selects the payload
//! record, e.g. `{"type":"chat","action":"created","payload":{...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ReadingId, SuggestionId, UserId};
use crate::models::{
    ChatMessage, MessageRole, MessageType, PhysiologicalReading, ReadingKind, Suggestion,
    SuggestionCategory,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Chat {
        action: Action,
        payload: ChatPayload,
    },
    AiSuggestion {
        action: Action,
        payload: SuggestionPayload,
    },
    Physiological {
        action: Action,
        payload: ReadingPayload,
    },
}

/// Payload of a `chat` envelope. Clients relaying a chat turn may omit the
/// server-assigned fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    pub role: MessageRole,
    pub patient_id: UserId,
    pub doctor_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionPayload {
    pub id: SuggestionId,
    pub message_id: MessageId,
    pub patient_id: UserId,
    pub content: String,
    pub category: SuggestionCategory,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ReadingId>,
    pub patient_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<UserId>,
    #[serde(rename = "type")]
    pub kind: ReadingKind,
    pub value: String,
    pub measured_at: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn chat_created(message: &ChatMessage) -> Self {
        Self::Chat {
            action: Action::Created,
            payload: ChatPayload {
                id: Some(message.id.clone()),
                content: message.content.clone(),
                kind: message.kind,
                role: message.role,
                patient_id: message.patient_id.clone(),
                doctor_id: message.doctor_id.clone(),
                created_at: Some(message.created_at),
            },
        }
    }

    pub fn suggestion_created(suggestion: &Suggestion) -> Self {
        Self::AiSuggestion {
            action: Action::Created,
            payload: SuggestionPayload {
                id: suggestion.id.clone(),
                message_id: suggestion.message_id.clone(),
                patient_id: suggestion.patient_id.clone(),
                content: suggestion.content.clone(),
                category: suggestion.category,
                priority: suggestion.priority,
                created_at: suggestion.created_at,
            },
        }
    }

    pub fn reading_created(reading: &PhysiologicalReading) -> Self {
        Self::Physiological {
            action: Action::Created,
            payload: ReadingPayload {
                id: Some(reading.id.clone()),
                patient_id: reading.patient_id.clone(),
                doctor_id: None,
                kind: reading.kind,
                value: reading.value.clone(),
                measured_at: reading.measured_at,
                source: reading.source.clone(),
                created_at: Some(reading.created_at),
            },
        }
    }

    /// Wire name of the envelope type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::AiSuggestion { .. } => "ai_suggestion",
            Self::Physiological { .. } => "physiological",
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Self::Chat { action, .. }
            | Self::AiSuggestion { action, .. }
            | Self::Physiological { action, .. } => *action,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
