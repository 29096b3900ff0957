/// SQL DDL for the carelink database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    gender TEXT NOT NULL,
    age INTEGER NOT NULL,
    blood_type TEXT NOT NULL DEFAULT '',
    allergies TEXT NOT NULL DEFAULT '[]',
    chronic_diseases TEXT NOT NULL DEFAULT '[]',
    doctor_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    doctor_id TEXT NOT NULL,
    content TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'text',
    role TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS suggestions (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    content TEXT NOT NULL,
    model_used TEXT NOT NULL,
    confidence REAL NOT NULL,
    category TEXT NOT NULL,
    priority INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS medical_records (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    diagnosis_date TEXT NOT NULL,
    diagnosis TEXT NOT NULL,
    treatment TEXT NOT NULL DEFAULT '',
    prescription TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS follow_up_records (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    follow_up_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS physiological_readings (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    type TEXT NOT NULL,
    value TEXT NOT NULL,
    measured_at TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_patient ON messages(patient_id, created_at);
CREATE INDEX IF NOT EXISTS idx_suggestions_patient ON suggestions(patient_id, created_at);
CREATE INDEX IF NOT EXISTS idx_suggestions_status ON suggestions(status);
CREATE INDEX IF NOT EXISTS idx_medical_records_patient ON medical_records(patient_id, diagnosis_date);
CREATE INDEX IF NOT EXISTS idx_follow_ups_patient ON follow_up_records(patient_id, follow_up_date);
CREATE INDEX IF NOT EXISTS idx_readings_patient ON physiological_readings(patient_id, measured_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
