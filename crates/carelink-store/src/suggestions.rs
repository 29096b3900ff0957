use async_trait::async_trait;
use tracing::instrument;

use carelink_core::errors::StoreError;
use carelink_core::ids::{MessageId, SuggestionId, UserId};
use carelink_core::models::{Suggestion, SuggestionStatus};
use carelink_core::store::SuggestionStore;

use crate::database::Database;
use crate::error::DbError;
use crate::row_helpers;

const COLUMNS: &str =
    "id, message_id, patient_id, content, model_used, confidence, category, priority, status, created_at";

pub struct SuggestionRepo {
    db: Database,
}

impl SuggestionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, suggestion), fields(suggestion_id = %suggestion.id, message_id = %suggestion.message_id))]
    pub fn insert(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO suggestions
                    (id, message_id, patient_id, content, model_used, confidence, category, priority, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    suggestion.id.as_str(),
                    suggestion.message_id.as_str(),
                    suggestion.patient_id.as_str(),
                    suggestion.content,
                    suggestion.model_used,
                    suggestion.confidence,
                    suggestion.category.to_string(),
                    suggestion.priority,
                    suggestion.status.to_string(),
                    row_helpers::format_time(&suggestion.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Suggestions for a patient, newest first.
    #[instrument(skip(self), fields(patient_id = %patient_id))]
    pub fn list_for_patient(
        &self,
        patient_id: &UserId,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<Suggestion>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM suggestions
                 WHERE patient_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let status = status.map(|s| s.to_string());
            let mut rows = stmt.query(rusqlite::params![patient_id.as_str(), status])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_suggestion(row)?);
            }
            Ok(results)
        })
    }
}

#[async_trait]
impl SuggestionStore for SuggestionRepo {
    async fn create_suggestion(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        self.insert(suggestion)
    }
}

fn row_to_suggestion(row: &rusqlite::Row<'_>) -> Result<Suggestion, DbError> {
    let category: String = row_helpers::get(row, 6, "suggestions", "category")?;
    let status: String = row_helpers::get(row, 8, "suggestions", "status")?;
    let created_at: String = row_helpers::get(row, 9, "suggestions", "created_at")?;

    Ok(Suggestion {
        id: SuggestionId::from_raw(row_helpers::get::<String>(row, 0, "suggestions", "id")?),
        message_id: MessageId::from_raw(row_helpers::get::<String>(row, 1, "suggestions", "message_id")?),
        patient_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "suggestions", "patient_id")?),
        content: row_helpers::get(row, 3, "suggestions", "content")?,
        model_used: row_helpers::get(row, 4, "suggestions", "model_used")?,
        confidence: row_helpers::get(row, 5, "suggestions", "confidence")?,
        category: row_helpers::parse_enum(&category, "suggestions", "category")?,
        priority: row_helpers::get(row, 7, "suggestions", "priority")?,
        status: row_helpers::parse_enum(&status, "suggestions", "status")?,
        created_at: row_helpers::parse_time(&created_at, "suggestions", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::models::SuggestionCategory;
    use chrono::{Duration, Utc};

    fn suggestion(content: &str, age_secs: i64) -> Suggestion {
        Suggestion {
            id: SuggestionId::new(),
            message_id: MessageId::from_raw("msg_1"),
            patient_id: UserId::from_raw("P1"),
            content: content.into(),
            model_used: "gpt-3.5-turbo".into(),
            confidence: 0.95,
            category: SuggestionCategory::Medication,
            priority: 3,
            status: SuggestionStatus::Pending,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn create_then_list() {
        let repo = SuggestionRepo::new(Database::in_memory().unwrap());
        let s = suggestion("rest and hydrate", 0);
        repo.create_suggestion(&s).await.unwrap();

        let listed = repo.list_for_patient(&UserId::from_raw("P1"), None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, s.id);
        assert_eq!(listed[0].status, SuggestionStatus::Pending);
        assert_eq!(listed[0].category, SuggestionCategory::Medication);
        assert_eq!(listed[0].priority, 3);
        assert!((listed[0].confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn list_is_newest_first() {
        let repo = SuggestionRepo::new(Database::in_memory().unwrap());
        repo.insert(&suggestion("old", 60)).unwrap();
        repo.insert(&suggestion("new", 1)).unwrap();
        let listed = repo.list_for_patient(&UserId::from_raw("P1"), None).unwrap();
        assert_eq!(listed[0].content, "new");
        assert_eq!(listed[1].content, "old");
    }

    #[test]
    fn status_filter() {
        let repo = SuggestionRepo::new(Database::in_memory().unwrap());
        let mut a = suggestion("a", 2);
        a.status = SuggestionStatus::Approved;
        let b = suggestion("b", 1);
        repo.insert(&a).unwrap();
        repo.insert(&b).unwrap();

        let pending = repo
            .list_for_patient(&UserId::from_raw("P1"), Some(SuggestionStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let approved = repo
            .list_for_patient(&UserId::from_raw("P1"), Some(SuggestionStatus::Approved))
            .unwrap();
        assert_eq!(approved[0].id, a.id);
    }
}
