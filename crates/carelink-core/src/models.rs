use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ReadingId, SuggestionId, UserId};

/// Role a live connection is opened under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Doctor => write!(f, "doctor"),
            Self::Patient => write!(f, "patient"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doctor" => Ok(Self::Doctor),
            "patient" => Ok(Self::Patient),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Author of a chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Doctor,
    Patient,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Doctor => write!(f, "doctor"),
            Self::Patient => write!(f, "patient"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doctor" => Ok(Self::Doctor),
            "patient" => Ok(Self::Patient),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Voice,
    File,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Voice => write!(f, "voice"),
            Self::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "voice" => Ok(Self::Voice),
            "file" => Ok(Self::File),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// One chat turn between a patient and their doctor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub patient_id: UserId,
    pub doctor_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub role: MessageRole,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A fresh unread text message stamped with the current time.
    pub fn text(
        patient_id: UserId,
        doctor_id: UserId,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            patient_id,
            doctor_id,
            content: content.into(),
            kind: MessageType::Text,
            role,
            read: false,
            created_at: Utc::now(),
        }
    }

    /// The user this message should be delivered to: the patient when a
    /// doctor wrote it, the doctor otherwise.
    pub fn counterpart(&self) -> &UserId {
        match self.role {
            MessageRole::Doctor => &self.patient_id,
            MessageRole::Patient | MessageRole::System => &self.doctor_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionCategory {
    Medication,
    Visit,
    Lifestyle,
    Urgent,
}

impl std::fmt::Display for SuggestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medication => write!(f, "medication"),
            Self::Visit => write!(f, "visit"),
            Self::Lifestyle => write!(f, "lifestyle"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for SuggestionCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medication" => Ok(Self::Medication),
            "visit" => Ok(Self::Visit),
            "lifestyle" => Ok(Self::Lifestyle),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown suggestion category: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for SuggestionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown suggestion status: {other}")),
        }
    }
}

/// A generated reply draft awaiting doctor review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: SuggestionId,
    pub message_id: MessageId,
    pub patient_id: UserId,
    pub content: String,
    pub model_used: String,
    pub confidence: f64,
    pub category: SuggestionCategory,
    /// 1 (lowest) to 5 (highest).
    pub priority: u8,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub id: UserId,
    pub name: String,
    pub gender: String,
    pub age: u32,
    pub blood_type: String,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub chronic_diseases: Vec<String>,
    pub doctor_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub id: String,
    pub patient_id: UserId,
    pub diagnosis_date: DateTime<Utc>,
    pub diagnosis: String,
    pub treatment: String,
    pub prescription: String,
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRecord {
    pub id: String,
    pub patient_id: UserId,
    pub title: String,
    pub content: String,
    pub follow_up_date: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    BloodPressure,
    BloodSugar,
    HeartRate,
    Temperature,
    Weight,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BloodPressure => write!(f, "blood_pressure"),
            Self::BloodSugar => write!(f, "blood_sugar"),
            Self::HeartRate => write!(f, "heart_rate"),
            Self::Temperature => write!(f, "temperature"),
            Self::Weight => write!(f, "weight"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for ReadingKind {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "blood_pressure" => Self::BloodPressure,
            "blood_sugar" => Self::BloodSugar,
            "heart_rate" => Self::HeartRate,
            "temperature" => Self::Temperature,
            "weight" => Self::Weight,
            _ => Self::Other,
        })
    }
}

/// A vital-sign measurement such as blood pressure (`"130/85"`) or blood
/// sugar (`"6.1-空腹"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysiologicalReading {
    pub id: ReadingId,
    pub patient_id: UserId,
    #[serde(rename = "type")]
    pub kind: ReadingKind,
    pub value: String,
    pub measured_at: DateTime<Utc>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_and_display() {
        assert_eq!("doctor".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!("patient".parse::<Role>().unwrap(), Role::Patient);
        assert!("admin".parse::<Role>().is_err());
        assert_eq!(Role::Doctor.to_string(), "doctor");
    }

    #[test]
    fn counterpart_of_doctor_message_is_patient() {
        let msg = ChatMessage::text(
            UserId::from_raw("P1"),
            UserId::from_raw("D1"),
            MessageRole::Doctor,
            "take rest",
        );
        assert_eq!(msg.counterpart().as_str(), "P1");
    }

    #[test]
    fn counterpart_of_patient_and_system_message_is_doctor() {
        let mut msg = ChatMessage::text(
            UserId::from_raw("P1"),
            UserId::from_raw("D1"),
            MessageRole::Patient,
            "hello",
        );
        assert_eq!(msg.counterpart().as_str(), "D1");
        msg.role = MessageRole::System;
        assert_eq!(msg.counterpart().as_str(), "D1");
    }

    #[test]
    fn chat_message_wire_shape() {
        let msg = ChatMessage::text(
            UserId::from_raw("P1"),
            UserId::from_raw("D1"),
            MessageRole::Patient,
            "hi",
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["role"], "patient");
        assert_eq!(json["patientId"], "P1");
        assert_eq!(json["doctorId"], "D1");
        assert_eq!(json["read"], false);
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn unknown_reading_kind_maps_to_other() {
        let kind: ReadingKind = serde_json::from_str("\"spo2\"").unwrap();
        assert_eq!(kind, ReadingKind::Other);
        assert_eq!("spo2".parse::<ReadingKind>().unwrap(), ReadingKind::Other);
        assert_eq!(
            "blood_pressure".parse::<ReadingKind>().unwrap(),
            ReadingKind::BloodPressure
        );
    }

    #[test]
    fn suggestion_enums_roundtrip_through_strings() {
        for status in [
            SuggestionStatus::Pending,
            SuggestionStatus::Approved,
            SuggestionStatus::Rejected,
        ] {
            assert_eq!(status.to_string().parse::<SuggestionStatus>().unwrap(), status);
        }
        assert_eq!(SuggestionStatus::default(), SuggestionStatus::Pending);
        assert_eq!(
            "urgent".parse::<SuggestionCategory>().unwrap(),
            SuggestionCategory::Urgent
        );
    }
}
