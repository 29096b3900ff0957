use carelink_core::errors::StoreError;
use carelink_core::models::{ChatMessage, FollowUpRecord, MedicalRecord, PatientProfile};
use carelink_core::provider::ChatTurn;
use tracing::warn;

use crate::pipeline::PipelineStores;
use crate::prompt::render_system_prompt;

/// Everything the provider sees for one suggestion.
#[derive(Clone, Debug)]
pub struct SuggestionContext {
    pub patient: PatientProfile,
    pub medical_records: Vec<MedicalRecord>,
    pub follow_ups: Vec<FollowUpRecord>,
    /// Windowed prior turns followed by the triggering message.
    pub turns: Vec<ChatTurn>,
}

impl SuggestionContext {
    /// Load the bounded context for `message`.
    ///
    /// An unknown patient is an error. Record and history lookups that fail
    /// are logged and leave the corresponding section empty.
    pub async fn load(
        stores: &PipelineStores,
        message: &ChatMessage,
        history_window: usize,
        record_limit: usize,
    ) -> Result<Self, StoreError> {
        let patient_id = &message.patient_id;
        let patient = stores.patients.patient(patient_id).await?;

        let medical_records = stores
            .records
            .recent_medical_records(patient_id, record_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(patient_id = %patient_id, error = %e, "failed to load medical records");
                Vec::new()
            });
        let follow_ups = stores
            .records
            .recent_follow_ups(patient_id, record_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(patient_id = %patient_id, error = %e, "failed to load follow-up records");
                Vec::new()
            });
        let history = stores.messages.history(patient_id).await.unwrap_or_else(|e| {
            warn!(patient_id = %patient_id, error = %e, "failed to load chat history");
            Vec::new()
        });

        Ok(Self {
            patient,
            medical_records: truncate(medical_records, record_limit),
            follow_ups: truncate(follow_ups, record_limit),
            turns: window_turns(&history, message, history_window),
        })
    }

    pub fn system_prompt(&self) -> String {
        render_system_prompt(&self.patient, &self.medical_records, &self.follow_ups)
    }
}

/// The last `window` turns before `current`, then `current` itself.
///
/// `history` is oldest first and may already contain `current`; it is
/// skipped by id so the new message is never counted twice.
pub fn window_turns(history: &[ChatMessage], current: &ChatMessage, window: usize) -> Vec<ChatTurn> {
    let prior: Vec<&ChatMessage> = history.iter().filter(|m| m.id != current.id).collect();
    let start = prior.len().saturating_sub(window);

    let mut turns: Vec<ChatTurn> = prior[start..].iter().map(|m| ChatTurn::from(*m)).collect();
    turns.push(ChatTurn::user(current.content.clone()));
    turns
}

fn truncate<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    items.truncate(limit);
    items
}
