//! Vital-sign extraction from free-text patient messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use carelink_core::errors::{ProviderError, StoreError};
use carelink_core::ids::{ReadingId, UserId};
use carelink_core::models::{ChatMessage, PhysiologicalReading, ReadingKind};
use carelink_core::notify::Notifier;
use carelink_core::provider::{ChatTurn, CompletionProvider, CompletionRequest};
use carelink_core::store::ReadingStore;

/// Source tag on readings produced here.
pub const EXTRACT_SOURCE: &str = "ai_extract";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const EXTRACTION_TEMPERATURE: f32 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("reply contains no JSON object")]
    NoJson,

    #[error("invalid extraction JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Extraction {
    blood_pressure: BloodPressure,
    blood_sugar: BloodSugar,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BloodPressure {
    systolic: u32,
    diastolic: u32,
    measured_at: String,
    has_data: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BloodSugar {
    value: f64,
    #[serde(rename = "type")]
    kind: String,
    measured_at: String,
    has_data: bool,
}

/// Asks the provider for blood pressure and blood sugar values mentioned
/// in a message, stores what it finds and pushes each reading to doctors.
pub struct ReadingExtractor {
    provider: Arc<dyn CompletionProvider>,
    readings: Arc<dyn ReadingStore>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl ReadingExtractor {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        readings: Arc<dyn ReadingStore>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            readings,
            notifier,
            timeout,
        }
    }

    /// Extract and store, logging the outcome. Never fails.
    #[instrument(skip_all, fields(message_id = %message.id, patient_id = %message.patient_id))]
    pub async fn run(&self, message: &ChatMessage) {
        match self.extract(&message.patient_id, &message.content).await {
            Ok(readings) if readings.is_empty() => debug!("no readings in message"),
            Ok(readings) => info!(count = readings.len(), "readings extracted"),
            Err(e) => warn!(error = %e, "reading extraction failed"),
        }
    }

    pub async fn extract(
        &self,
        patient_id: &UserId,
        content: &str,
    ) -> Result<Vec<PhysiologicalReading>, ExtractError> {
        let now = Local::now();
        let system_prompt = extraction_prompt(&now.format(TIME_FORMAT).to_string());
        let turns = [ChatTurn::user(content)];
        let request = CompletionRequest::new(&system_prompt, &turns, self.timeout)
            .with_temperature(EXTRACTION_TEMPERATURE);

        let reply = tokio::time::timeout(self.timeout, self.provider.complete(&request))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;

        let extraction: Extraction = serde_json::from_str(json_object(&reply).ok_or(ExtractError::NoJson)?)?;
        let readings = to_readings(patient_id, extraction);

        for reading in &readings {
            self.readings.create_reading(reading).await?;
            let delivered = self.notifier.notify_new_physiological_reading(reading);
            debug!(reading_id = %reading.id, kind = %reading.kind, delivered, "reading stored");
        }
        Ok(readings)
    }
}

fn extraction_prompt(current_time: &str) -> String {
    format!(
        "你是一个医疗数据分析助手。请从患者的消息中提取血压、血糖数据和测量时间\n\
         （请注意患者聊天记录中说明的时间，如果是相对时间需要和当前时间进行比较）。\n\
         如果存在多个数据，请提取最新的一组。请按以下JSON格式返回:\n\
         {{\n\
         \x20   \"bloodPressure\": {{\n\
         \x20       \"systolic\": 收缩压数值(int),\n\
         \x20       \"diastolic\": 舒张压数值(int),\n\
         \x20       \"measuredAt\": \"测量时间(YYYY-MM-DD HH:mm:ss格式)\",\n\
         \x20       \"hasData\": true/false\n\
         \x20   }},\n\
         \x20   \"bloodSugar\": {{\n\
         \x20       \"value\": 血糖值(float),\n\
         \x20       \"type\": \"空腹/餐后/随机\",\n\
         \x20       \"measuredAt\": \"测量时间(YYYY-MM-DD HH:mm:ss格式)\",\n\
         \x20       \"hasData\": true/false\n\
         \x20   }}\n\
         }}\n\
         如果消息中未明确提到测量时间，则使用当前时间: {current_time}。"
    )
}

/// The outermost `{...}` span, which skips code fences and prose around it.
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

/// Local wall-clock time as written by the provider; now when unparseable.
fn parse_measured_at(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn to_readings(patient_id: &UserId, extraction: Extraction) -> Vec<PhysiologicalReading> {
    let mut readings = Vec::new();

    let bp = extraction.blood_pressure;
    if bp.has_data && bp.systolic > 0 && bp.diastolic > 0 {
        readings.push(reading(
            patient_id,
            ReadingKind::BloodPressure,
            format!("{}/{}", bp.systolic, bp.diastolic),
            parse_measured_at(&bp.measured_at),
        ));
    }

    let sugar = extraction.blood_sugar;
    if sugar.has_data && sugar.value > 0.0 {
        let kind = sugar.kind.trim();
        let value = if kind.is_empty() {
            format!("{:.1}", sugar.value)
        } else {
            format!("{:.1}-{kind}", sugar.value)
        };
        readings.push(reading(
            patient_id,
            ReadingKind::BloodSugar,
            value,
            parse_measured_at(&sugar.measured_at),
        ));
    }

    readings
}

fn reading(
    patient_id: &UserId,
    kind: ReadingKind,
    value: String,
    measured_at: DateTime<Utc>,
) -> PhysiologicalReading {
    PhysiologicalReading {
        id: ReadingId::new(),
        patient_id: patient_id.clone(),
        kind,
        value,
        measured_at,
        source: EXTRACT_SOURCE.to_string(),
        created_at: Utc::now(),
    }
}
