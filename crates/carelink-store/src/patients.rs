use async_trait::async_trait;
use tracing::instrument;

use carelink_core::errors::StoreError;
use carelink_core::ids::UserId;
use carelink_core::models::PatientProfile;
use carelink_core::store::PatientStore;

use crate::database::Database;
use crate::error::DbError;
use crate::row_helpers;

pub struct PatientRepo {
    db: Database,
}

impl PatientRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a patient profile.
    #[instrument(skip(self, patient), fields(patient_id = %patient.id))]
    pub fn upsert(&self, patient: &PatientProfile) -> Result<(), StoreError> {
        let allergies = serde_json::to_string(&patient.allergies)?;
        let chronic = serde_json::to_string(&patient.chronic_diseases)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO patients (id, name, gender, age, blood_type, allergies, chronic_diseases, doctor_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    gender = excluded.gender,
                    age = excluded.age,
                    blood_type = excluded.blood_type,
                    allergies = excluded.allergies,
                    chronic_diseases = excluded.chronic_diseases,
                    doctor_id = excluded.doctor_id",
                rusqlite::params![
                    patient.id.as_str(),
                    patient.name,
                    patient.gender,
                    patient.age,
                    patient.blood_type,
                    allergies,
                    chronic,
                    patient.doctor_id.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(patient_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<PatientProfile, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, gender, age, blood_type, allergies, chronic_diseases, doctor_id
                 FROM patients WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_patient(row),
                None => Err(StoreError::NotFound(format!("patient {id}")).into()),
            }
        })
    }
}

#[async_trait]
impl PatientStore for PatientRepo {
    async fn patient(&self, patient_id: &UserId) -> Result<PatientProfile, StoreError> {
        self.get(patient_id)
    }
}

fn row_to_patient(row: &rusqlite::Row<'_>) -> Result<PatientProfile, DbError> {
    let allergies: String = row_helpers::get(row, 5, "patients", "allergies")?;
    let chronic: String = row_helpers::get(row, 6, "patients", "chronic_diseases")?;

    Ok(PatientProfile {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, "patients", "id")?),
        name: row_helpers::get(row, 1, "patients", "name")?,
        gender: row_helpers::get(row, 2, "patients", "gender")?,
        age: row_helpers::get(row, 3, "patients", "age")?,
        blood_type: row_helpers::get(row, 4, "patients", "blood_type")?,
        allergies: row_helpers::parse_string_list(&allergies, "patients", "allergies")?,
        chronic_diseases: row_helpers::parse_string_list(&chronic, "patients", "chronic_diseases")?,
        doctor_id: UserId::from_raw(row_helpers::get::<String>(row, 7, "patients", "doctor_id")?),
    })
}
