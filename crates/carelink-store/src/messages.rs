use async_trait::async_trait;
use tracing::instrument;

use carelink_core::errors::StoreError;
use carelink_core::ids::{MessageId, UserId};
use carelink_core::models::ChatMessage;
use carelink_core::store::MessageStore;

use crate::database::Database;
use crate::error::DbError;
use crate::row_helpers;

const COLUMNS: &str = "id, patient_id, doctor_id, content, type, role, read, created_at";

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, message), fields(message_id = %message.id, patient_id = %message.patient_id))]
    pub fn insert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, patient_id, doctor_id, content, type, role, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id.as_str(),
                    message.patient_id.as_str(),
                    message.doctor_id.as_str(),
                    message.content,
                    message.kind.to_string(),
                    message.role.to_string(),
                    message.read,
                    row_helpers::format_time(&message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Every message of a patient's conversation, oldest first.
    #[instrument(skip(self), fields(patient_id = %patient_id))]
    pub fn list_for_patient(&self, patient_id: &UserId) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages WHERE patient_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let mut rows = stmt.query([patient_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<ChatMessage, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}")).into()),
            }
        })
    }
}

#[async_trait]
impl MessageStore for MessageRepo {
    async fn history(&self, patient_id: &UserId) -> Result<Vec<ChatMessage>, StoreError> {
        self.list_for_patient(patient_id)
    }

    async fn create_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.insert(message)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, DbError> {
    let kind: String = row_helpers::get(row, 4, "messages", "type")?;
    let role: String = row_helpers::get(row, 5, "messages", "role")?;
    let created_at: String = row_helpers::get(row, 7, "messages", "created_at")?;

    Ok(ChatMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        patient_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "messages", "patient_id")?),
        doctor_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "messages", "doctor_id")?),
        content: row_helpers::get(row, 3, "messages", "content")?,
        kind: row_helpers::parse_enum(&kind, "messages", "type")?,
        role: row_helpers::parse_enum(&role, "messages", "role")?,
        read: row_helpers::get(row, 6, "messages", "read")?,
        created_at: row_helpers::parse_time(&created_at, "messages", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::models::MessageRole;
    use chrono::{Duration, Utc};

    fn message(role: MessageRole, content: &str, offset_secs: i64) -> ChatMessage {
        let mut msg = ChatMessage::text(UserId::from_raw("P1"), UserId::from_raw("D1"), role, content);
        msg.created_at = Utc::now() - Duration::seconds(100 - offset_secs);
        msg
    }

    #[test]
    fn insert_and_get() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        let msg = message(MessageRole::Patient, "I feel dizzy", 0);
        repo.insert(&msg).unwrap();

        let fetched = repo.get(&msg.id).unwrap();
        assert_eq!(fetched.content, "I feel dizzy");
        assert_eq!(fetched.role, MessageRole::Patient);
        assert!(!fetched.read);
        assert_eq!(
            row_helpers::format_time(&fetched.created_at),
            row_helpers::format_time(&msg.created_at)
        );
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        let err = repo.get(&MessageId::from_raw("msg_missing")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn duplicate_id_is_conflict() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        let msg = message(MessageRole::Patient, "hi", 0);
        repo.insert(&msg).unwrap();
        assert!(matches!(repo.insert(&msg), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn history_is_chronological_and_scoped() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        repo.insert(&message(MessageRole::Patient, "third", 30)).unwrap();
        repo.insert(&message(MessageRole::Patient, "first", 10)).unwrap();
        repo.insert(&message(MessageRole::Doctor, "second", 20)).unwrap();

        let mut other = message(MessageRole::Patient, "someone else", 15);
        other.patient_id = UserId::from_raw("P2");
        repo.insert(&other).unwrap();

        let history = repo.list_for_patient(&UserId::from_raw("P1")).unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn trait_methods_delegate() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        let msg = message(MessageRole::Patient, "via trait", 0);
        repo.create_message(&msg).await.unwrap();
        let history = repo.history(&UserId::from_raw("P1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, msg.id);
    }
}
