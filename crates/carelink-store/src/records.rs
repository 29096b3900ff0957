use async_trait::async_trait;
use tracing::instrument;

use carelink_core::errors::StoreError;
use carelink_core::ids::UserId;
use carelink_core::models::{FollowUpRecord, MedicalRecord};
use carelink_core::store::RecordStore;

use crate::database::Database;
use crate::error::DbError;
use crate::row_helpers;

/// Clinical and follow-up records. Both are written by the CRUD layer and
/// only read here when building suggestion context.
pub struct RecordRepo {
    db: Database,
}

impl RecordRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, record), fields(record_id = %record.id, patient_id = %record.patient_id))]
    pub fn insert_medical_record(&self, record: &MedicalRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO medical_records (id, patient_id, diagnosis_date, diagnosis, treatment, prescription, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.id,
                    record.patient_id.as_str(),
                    row_helpers::format_time(&record.diagnosis_date),
                    record.diagnosis,
                    record.treatment,
                    record.prescription,
                    record.notes,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self, record), fields(record_id = %record.id, patient_id = %record.patient_id))]
    pub fn insert_follow_up(&self, record: &FollowUpRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO follow_up_records (id, patient_id, title, content, follow_up_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.id,
                    record.patient_id.as_str(),
                    record.title,
                    record.content,
                    row_helpers::format_time(&record.follow_up_date),
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(patient_id = %patient_id))]
    pub fn medical_records(&self, patient_id: &UserId, limit: usize) -> Result<Vec<MedicalRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, patient_id, diagnosis_date, diagnosis, treatment, prescription, notes
                 FROM medical_records WHERE patient_id = ?1
                 ORDER BY diagnosis_date DESC, rowid DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![patient_id.as_str(), limit as i64])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_medical_record(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(patient_id = %patient_id))]
    pub fn follow_ups(&self, patient_id: &UserId, limit: usize) -> Result<Vec<FollowUpRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, patient_id, title, content, follow_up_date
                 FROM follow_up_records WHERE patient_id = ?1
                 ORDER BY follow_up_date DESC, rowid DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![patient_id.as_str(), limit as i64])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_follow_up(row)?);
            }
            Ok(results)
        })
    }
}

#[async_trait]
impl RecordStore for RecordRepo {
    async fn recent_medical_records(
        &self,
        patient_id: &UserId,
        limit: usize,
    ) -> Result<Vec<MedicalRecord>, StoreError> {
        self.medical_records(patient_id, limit)
    }

    async fn recent_follow_ups(
        &self,
        patient_id: &UserId,
        limit: usize,
    ) -> Result<Vec<FollowUpRecord>, StoreError> {
        self.follow_ups(patient_id, limit)
    }
}

fn row_to_medical_record(row: &rusqlite::Row<'_>) -> Result<MedicalRecord, DbError> {
    let date: String = row_helpers::get(row, 2, "medical_records", "diagnosis_date")?;
    Ok(MedicalRecord {
        id: row_helpers::get(row, 0, "medical_records", "id")?,
        patient_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "medical_records", "patient_id")?),
        diagnosis_date: row_helpers::parse_time(&date, "medical_records", "diagnosis_date")?,
        diagnosis: row_helpers::get(row, 3, "medical_records", "diagnosis")?,
        treatment: row_helpers::get(row, 4, "medical_records", "treatment")?,
        prescription: row_helpers::get(row, 5, "medical_records", "prescription")?,
        notes: row_helpers::get(row, 6, "medical_records", "notes")?,
    })
}

fn row_to_follow_up(row: &rusqlite::Row<'_>) -> Result<FollowUpRecord, DbError> {
    let date: String = row_helpers::get(row, 4, "follow_up_records", "follow_up_date")?;
    Ok(FollowUpRecord {
        id: row_helpers::get(row, 0, "follow_up_records", "id")?,
        patient_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "follow_up_records", "patient_id")?),
        title: row_helpers::get(row, 2, "follow_up_records", "title")?,
        content: row_helpers::get(row, 3, "follow_up_records", "content")?,
        follow_up_date: row_helpers::parse_time(&date, "follow_up_records", "follow_up_date")?,
    })
}
