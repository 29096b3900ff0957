//! Message-send path: persist first, then notify, then hand patient messages
//! to the suggestion pipeline. The caller only ever waits on the write.

use std::sync::Arc;

use tracing::{info, instrument};

use carelink_assist::SuggestionPipeline;
use carelink_core::errors::StoreError;
use carelink_core::ids::UserId;
use carelink_core::models::{ChatMessage, MessageRole, PatientProfile, PhysiologicalReading};
use carelink_core::notify::Notifier;
use carelink_core::store::{MessageStore, PatientStore, ReadingStore};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("unknown patient: {0}")]
    UnknownPatient(UserId),

    #[error("message content is empty")]
    EmptyContent,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence collaborators of the send path.
#[derive(Clone)]
pub struct ChatStores {
    pub messages: Arc<dyn MessageStore>,
    pub patients: Arc<dyn PatientStore>,
    pub readings: Arc<dyn ReadingStore>,
}

pub struct ChatService {
    stores: ChatStores,
    notifier: Arc<dyn Notifier>,
    pipeline: Option<Arc<SuggestionPipeline>>,
}

impl ChatService {
    pub fn new(stores: ChatStores, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            stores,
            notifier,
            pipeline: None,
        }
    }

    /// Attach the pipeline triggered by every stored patient message.
    pub fn with_pipeline(mut self, pipeline: Arc<SuggestionPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    async fn patient(&self, patient_id: &UserId) -> Result<PatientProfile, ChatError> {
        self.stores.patients.patient(patient_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ChatError::UnknownPatient(patient_id.clone()),
            other => ChatError::Store(other),
        })
    }

    /// Store a patient-authored message, push it to their doctor and start
    /// the suggestion pipeline for it. Returns the stored message.
    #[instrument(skip(self, content), fields(patient_id = %patient_id))]
    pub async fn send_patient_message(
        &self,
        patient_id: &UserId,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyContent);
        }
        let patient = self.patient(patient_id).await?;

        let message = ChatMessage::text(
            patient.id.clone(),
            patient.doctor_id.clone(),
            MessageRole::Patient,
            content,
        );
        self.stores.messages.create_message(&message).await?;

        let delivered = self.notifier.notify_new_message(&message);
        if let Some(pipeline) = &self.pipeline {
            // Detached: failures end up in the logs, never in this call.
            drop(pipeline.spawn(message.clone()));
        }

        info!(message_id = %message.id, delivered, "patient message stored");
        Ok(message)
    }

    /// Store a doctor-authored reply and push it to the patient.
    #[instrument(skip(self, content), fields(patient_id = %patient_id, doctor_id = %doctor_id))]
    pub async fn send_doctor_message(
        &self,
        patient_id: &UserId,
        doctor_id: &UserId,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyContent);
        }
        let patient = self.patient(patient_id).await?;

        let message = ChatMessage::text(
            patient.id,
            doctor_id.clone(),
            MessageRole::Doctor,
            content,
        );
        self.stores.messages.create_message(&message).await?;

        let delivered = self.notifier.notify_new_message(&message);
        info!(message_id = %message.id, delivered, "doctor message stored");
        Ok(message)
    }

    /// Store a vital-sign reading and push it to connected doctors.
    #[instrument(skip(self, reading), fields(patient_id = %reading.patient_id, kind = %reading.kind))]
    pub async fn record_reading(
        &self,
        reading: PhysiologicalReading,
    ) -> Result<PhysiologicalReading, ChatError> {
        let _ = self.patient(&reading.patient_id).await?;
        self.stores.readings.create_reading(&reading).await?;

        let delivered = self.notifier.notify_new_physiological_reading(&reading);
        info!(reading_id = %reading.id, delivered, "reading stored");
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::hub::Hub;
    use crate::notify::NotificationService;
    use carelink_assist::{PipelineConfig, PipelineStores};
    use carelink_core::ids::ReadingId;
    use carelink_core::models::{ReadingKind, Role, SuggestionStatus};
    use carelink_llm::{MockProvider, MockResponse};
    use carelink_store::{
        Database, MessageRepo, PatientRepo, ReadingRepo, RecordRepo, SuggestionRepo,
    };
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        hub: Arc<Hub>,
        messages: Arc<MessageRepo>,
        suggestions: Arc<SuggestionRepo>,
        readings: Arc<ReadingRepo>,
        provider: Arc<MockProvider>,
        service: ChatService,
    }

    fn fixture(responses: Vec<MockResponse>) -> Fixture {
        let db = Database::in_memory().unwrap();
        let patients = Arc::new(PatientRepo::new(db.clone()));
        patients
            .upsert(&PatientProfile {
                id: UserId::from_raw("P1"),
                name: "Li Na".into(),
                gender: "female".into(),
                age: 52,
                blood_type: "A".into(),
                allergies: vec!["penicillin".into()],
                chronic_diseases: vec!["hypertension".into()],
                doctor_id: UserId::from_raw("D1"),
            })
            .unwrap();
        let messages = Arc::new(MessageRepo::new(db.clone()));
        let suggestions = Arc::new(SuggestionRepo::new(db.clone()));
        let readings = Arc::new(ReadingRepo::new(db.clone()));

        let hub = Arc::new(Hub::new());
        let _ = hub.start(CancellationToken::new()).unwrap();
        let notifier: Arc<dyn Notifier> = Arc::new(NotificationService::new(hub.clone()));

        let provider = Arc::new(MockProvider::new(responses));
        let pipeline = Arc::new(SuggestionPipeline::new(
            provider.clone(),
            PipelineStores {
                messages: messages.clone(),
                suggestions: suggestions.clone(),
                patients: patients.clone(),
                records: Arc::new(RecordRepo::new(db)),
                readings: readings.clone(),
            },
            notifier.clone(),
            PipelineConfig {
                extract_readings: false,
                ..PipelineConfig::default()
            },
        ));

        let service = ChatService::new(
            ChatStores {
                messages: messages.clone(),
                patients,
                readings: readings.clone(),
            },
            notifier,
        )
        .with_pipeline(pipeline);

        Fixture {
            hub,
            messages,
            suggestions,
            readings,
            provider,
            service,
        }
    }

    async fn connect(hub: &Hub, user: &str, role: Role) -> mpsc::Receiver<Arc<str>> {
        let (conn, mailbox) = Connection::new(UserId::from_raw(user), role, 16);
        hub.register(conn).await.unwrap();
        mailbox
    }

    async fn next_frame(mailbox: &mut mpsc::Receiver<Arc<str>>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), mailbox.recv())
            .await
            .expect("frame in time")
            .expect("mailbox open");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn patient_message_is_stored_pushed_and_answered() {
        let f = fixture(vec![MockResponse::text("Rest, hydrate, avoid penicillin.")]);
        let mut doctor = connect(&f.hub, "D1", Role::Doctor).await;
        let mut patient = connect(&f.hub, "P1", Role::Patient).await;

        let msg = f
            .service
            .send_patient_message(&UserId::from_raw("P1"), "  I have a headache since this morning ")
            .await
            .unwrap();
        assert_eq!(msg.content, "I have a headache since this morning");
        assert_eq!(msg.doctor_id.as_str(), "D1");
        let persisted = f.messages.get(&msg.id).unwrap();
        assert_eq!(persisted.content, msg.content);
        assert_eq!(persisted.role, MessageRole::Patient);

        let chat = next_frame(&mut doctor).await;
        assert_eq!(chat["type"], "chat");
        assert_eq!(chat["payload"]["id"], msg.id.as_str());

        let suggestion = next_frame(&mut doctor).await;
        assert_eq!(suggestion["type"], "ai_suggestion");
        assert_eq!(suggestion["payload"]["messageId"], msg.id.as_str());
        assert_eq!(suggestion["payload"]["patientId"], "P1");

        let stored = f
            .suggestions
            .list_for_patient(&UserId::from_raw("P1"), Some(SuggestionStatus::Pending))
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_id, msg.id);

        let prompt = &f.provider.requests()[0].system_prompt;
        assert!(prompt.contains("penicillin"));

        // The sender never gets their own message back.
        assert!(patient.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_does_not_delay_the_sender() {
        let f = fixture(vec![MockResponse::delayed(
            Duration::from_secs(25),
            MockResponse::text("Check blood pressure twice daily."),
        )]);
        let mut doctor = connect(&f.hub, "D1", Role::Doctor).await;

        let started = tokio::time::Instant::now();
        let msg = f
            .service
            .send_patient_message(&UserId::from_raw("P1"), "dizzy after standing up")
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);

        let chat = serde_json::from_str::<serde_json::Value>(&doctor.try_recv().unwrap()).unwrap();
        assert_eq!(chat["type"], "chat");

        tokio::time::sleep(Duration::from_secs(24)).await;
        assert!(doctor.try_recv().is_err());

        let suggestion = next_frame(&mut doctor).await;
        assert_eq!(suggestion["type"], "ai_suggestion");
        assert_eq!(suggestion["payload"]["messageId"], msg.id.as_str());
        assert_eq!(suggestion["payload"]["content"], "Check blood pressure twice daily.");
        assert!(started.elapsed() >= Duration::from_secs(25));
    }

    #[tokio::test]
    async fn unknown_patient_is_rejected_before_writing() {
        let f = fixture(vec![]);
        let err = f
            .service
            .send_patient_message(&UserId::from_raw("P404"), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UnknownPatient(ref id) if id.as_str() == "P404"));
        assert!(f.messages.list_for_patient(&UserId::from_raw("P404")).unwrap().is_empty());
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let f = fixture(vec![]);
        let err = f
            .service
            .send_patient_message(&UserId::from_raw("P1"), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyContent));
    }

    #[tokio::test]
    async fn doctor_reply_reaches_patient_without_pipeline() {
        let f = fixture(vec![]);
        let mut patient = connect(&f.hub, "P1", Role::Patient).await;

        let msg = f
            .service
            .send_doctor_message(&UserId::from_raw("P1"), &UserId::from_raw("D1"), "Take ibuprofen.")
            .await
            .unwrap();
        assert_eq!(msg.role, MessageRole::Doctor);

        let frame = next_frame(&mut patient).await;
        assert_eq!(frame["payload"]["content"], "Take ibuprofen.");
        assert_eq!(frame["payload"]["role"], "doctor");

        tokio::task::yield_now().await;
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn reading_is_stored_and_pushed_to_doctors() {
        let f = fixture(vec![]);
        let mut doctor = connect(&f.hub, "D1", Role::Doctor).await;

        let reading = PhysiologicalReading {
            id: ReadingId::new(),
            patient_id: UserId::from_raw("P1"),
            kind: ReadingKind::BloodPressure,
            value: "142/91".into(),
            measured_at: Utc::now(),
            source: "manual".into(),
            created_at: Utc::now(),
        };
        let stored = f.service.record_reading(reading.clone()).await.unwrap();
        assert_eq!(stored.id, reading.id);
        assert_eq!(f.readings.recent(&UserId::from_raw("P1"), 5).unwrap().len(), 1);

        let frame = next_frame(&mut doctor).await;
        assert_eq!(frame["type"], "physiological");
        assert_eq!(frame["payload"]["value"], "142/91");
    }
}
