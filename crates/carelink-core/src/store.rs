//! Persistence boundaries consumed by the notification core.
//!
//! The core never reads or writes storage directly; it goes through these
//! traits so the CRUD layer can back them with whatever it owns.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::ids::UserId;
use crate::models::{
    ChatMessage, FollowUpRecord, MedicalRecord, PatientProfile, PhysiologicalReading, Suggestion,
};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All chat turns for a patient, oldest first.
    async fn history(&self, patient_id: &UserId) -> Result<Vec<ChatMessage>, StoreError>;

    async fn create_message(&self, message: &ChatMessage) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SuggestionStore: Send + Sync {
    async fn create_suggestion(&self, suggestion: &Suggestion) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Fails with [`StoreError::NotFound`] for unknown patients.
    async fn patient(&self, patient_id: &UserId) -> Result<PatientProfile, StoreError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Most recent clinical records, newest first, at most `limit`.
    async fn recent_medical_records(
        &self,
        patient_id: &UserId,
        limit: usize,
    ) -> Result<Vec<MedicalRecord>, StoreError>;

    /// Most recent follow-up records, newest first, at most `limit`.
    async fn recent_follow_ups(
        &self,
        patient_id: &UserId,
        limit: usize,
    ) -> Result<Vec<FollowUpRecord>, StoreError>;
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn create_reading(&self, reading: &PhysiologicalReading) -> Result<(), StoreError>;
}
