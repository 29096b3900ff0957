use async_trait::async_trait;
use tracing::instrument;

use carelink_core::errors::StoreError;
use carelink_core::ids::{ReadingId, UserId};
use carelink_core::models::PhysiologicalReading;
use carelink_core::store::ReadingStore;

use crate::database::Database;
use crate::error::DbError;
use crate::row_helpers;

pub struct ReadingRepo {
    db: Database,
}

impl ReadingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, reading), fields(reading_id = %reading.id, patient_id = %reading.patient_id, kind = %reading.kind))]
    pub fn insert(&self, reading: &PhysiologicalReading) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO physiological_readings (id, patient_id, type, value, measured_at, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    reading.id.as_str(),
                    reading.patient_id.as_str(),
                    reading.kind.to_string(),
                    reading.value,
                    row_helpers::format_time(&reading.measured_at),
                    reading.source,
                    row_helpers::format_time(&reading.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Most recent readings for a patient by measurement time.
    #[instrument(skip(self), fields(patient_id = %patient_id))]
    pub fn recent(&self, patient_id: &UserId, limit: usize) -> Result<Vec<PhysiologicalReading>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, patient_id, type, value, measured_at, source, created_at
                 FROM physiological_readings WHERE patient_id = ?1
                 ORDER BY measured_at DESC, rowid DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![patient_id.as_str(), limit as i64])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_reading(row)?);
            }
            Ok(results)
        })
    }
}

#[async_trait]
impl ReadingStore for ReadingRepo {
    async fn create_reading(&self, reading: &PhysiologicalReading) -> Result<(), StoreError> {
        self.insert(reading)
    }
}

fn row_to_reading(row: &rusqlite::Row<'_>) -> Result<PhysiologicalReading, DbError> {
    let kind: String = row_helpers::get(row, 2, "physiological_readings", "type")?;
    let measured_at: String = row_helpers::get(row, 4, "physiological_readings", "measured_at")?;
    let created_at: String = row_helpers::get(row, 6, "physiological_readings", "created_at")?;

    Ok(PhysiologicalReading {
        id: ReadingId::from_raw(row_helpers::get::<String>(row, 0, "physiological_readings", "id")?),
        patient_id: UserId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "physiological_readings",
            "patient_id",
        )?),
        kind: row_helpers::parse_enum(&kind, "physiological_readings", "type")?,
        value: row_helpers::get(row, 3, "physiological_readings", "value")?,
        measured_at: row_helpers::parse_time(&measured_at, "physiological_readings", "measured_at")?,
        source: row_helpers::get(row, 5, "physiological_readings", "source")?,
        created_at: row_helpers::parse_time(&created_at, "physiological_readings", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::models::ReadingKind;
    use chrono::{Duration, Utc};

    fn reading(kind: ReadingKind, value: &str, hours_ago: i64) -> PhysiologicalReading {
        PhysiologicalReading {
            id: ReadingId::new(),
            patient_id: UserId::from_raw("P1"),
            kind,
            value: value.into(),
            measured_at: Utc::now() - Duration::hours(hours_ago),
            source: "ai_extract".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let repo = ReadingRepo::new(Database::in_memory().unwrap());
        repo.create_reading(&reading(ReadingKind::BloodPressure, "130/85", 2))
            .await
            .unwrap();
        repo.create_reading(&reading(ReadingKind::BloodSugar, "6.1-空腹", 1))
            .await
            .unwrap();

        let recent = repo.recent(&UserId::from_raw("P1"), 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, ReadingKind::BloodSugar);
        assert_eq!(recent[0].value, "6.1-空腹");
        assert_eq!(recent[1].value, "130/85");
        assert_eq!(recent[1].source, "ai_extract");
    }

    #[test]
    fn recent_respects_limit() {
        let repo = ReadingRepo::new(Database::in_memory().unwrap());
        for h in 0..4 {
            repo.insert(&reading(ReadingKind::HeartRate, &format!("{}", 70 + h), h)).unwrap();
        }
        let recent = repo.recent(&UserId::from_raw("P1"), 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].value, "70");
    }
}
