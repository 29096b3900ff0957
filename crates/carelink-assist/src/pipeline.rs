//! Suggestion pipeline: one detached run per persisted patient message.
//!
//! ```text
//! load context ─→ render prompt ─→ provider (deadline) ─┬─→ persist pending ─→ notify doctors
//!                                                       └─ error / timeout → keyword template
//! ```
//!
//! Nothing here propagates to the caller. Each failure is logged and ends
//! only the remaining side effects of that run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use carelink_core::errors::ProviderError;
use carelink_core::ids::SuggestionId;
use carelink_core::models::{ChatMessage, MessageRole, Suggestion, SuggestionCategory, SuggestionStatus};
use carelink_core::notify::Notifier;
use carelink_core::provider::{CompletionProvider, CompletionRequest};
use carelink_core::store::{MessageStore, PatientStore, ReadingStore, RecordStore, SuggestionStore};

use crate::context::SuggestionContext;
use crate::extract::ReadingExtractor;
use crate::fallback::{fallback_for, FALLBACK_MODEL};

const PROVIDER_CONFIDENCE: f64 = 0.95;
const FALLBACK_CONFIDENCE: f64 = 0.5;
const DEFAULT_PRIORITY: u8 = 3;

/// Persistence collaborators the pipeline reads from and writes to.
#[derive(Clone)]
pub struct PipelineStores {
    pub messages: Arc<dyn MessageStore>,
    pub suggestions: Arc<dyn SuggestionStore>,
    pub patients: Arc<dyn PatientStore>,
    pub records: Arc<dyn RecordStore>,
    pub readings: Arc<dyn ReadingStore>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Deadline for the suggestion completion.
    pub timeout: Duration,
    pub extraction_timeout: Duration,
    pub history_window: usize,
    pub record_limit: usize,
    pub extract_readings: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            extraction_timeout: Duration::from_secs(15),
            history_window: 5,
            record_limit: 5,
            extract_readings: true,
        }
    }
}

pub struct SuggestionPipeline {
    provider: Arc<dyn CompletionProvider>,
    stores: PipelineStores,
    notifier: Arc<dyn Notifier>,
    extractor: Option<ReadingExtractor>,
    config: PipelineConfig,
}

impl SuggestionPipeline {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        stores: PipelineStores,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        let extractor = config.extract_readings.then(|| {
            ReadingExtractor::new(
                provider.clone(),
                stores.readings.clone(),
                notifier.clone(),
                config.extraction_timeout,
            )
        });
        Self {
            provider,
            stores,
            notifier,
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for `message` on its own task, followed by reading
    /// extraction when enabled. The caller does not wait on it.
    pub fn spawn(self: &Arc<Self>, message: ChatMessage) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let _ = pipeline.run(&message).await;
            if let Some(extractor) = &pipeline.extractor {
                extractor.run(&message).await;
            }
        })
    }

    /// Produce, persist and announce one suggestion. Returns the persisted
    /// suggestion, or `None` when the run stopped early.
    #[instrument(skip_all, fields(message_id = %message.id, patient_id = %message.patient_id))]
    pub async fn run(&self, message: &ChatMessage) -> Option<Suggestion> {
        if message.role != MessageRole::Patient {
            debug!(role = %message.role, "not a patient message, skipping");
            return None;
        }

        let context = match SuggestionContext::load(
            &self.stores,
            message,
            self.config.history_window,
            self.config.record_limit,
        )
        .await
        {
            Ok(context) => context,
            Err(e) => {
                error!(error = %e, "failed to load suggestion context");
                return None;
            }
        };

        let suggestion = self.generate(&context, message).await;

        if let Err(e) = self.stores.suggestions.create_suggestion(&suggestion).await {
            error!(suggestion_id = %suggestion.id, error = %e, "failed to persist suggestion");
            return None;
        }

        let delivered = self.notifier.notify_new_suggestion(&suggestion);
        info!(
            suggestion_id = %suggestion.id,
            model = %suggestion.model_used,
            delivered,
            "suggestion created"
        );
        Some(suggestion)
    }

    /// Call the provider under the deadline; fall back to a keyword template
    /// on any failure. Always yields a pending suggestion with content.
    pub async fn generate(&self, context: &SuggestionContext, message: &ChatMessage) -> Suggestion {
        let system_prompt = context.system_prompt();
        let request = CompletionRequest::new(&system_prompt, &context.turns, self.config.timeout);

        let outcome = tokio::time::timeout(self.config.timeout, self.provider.complete(&request))
            .await
            .unwrap_or(Err(ProviderError::Timeout(self.config.timeout)));

        match outcome {
            Ok(text) => pending(
                message,
                text,
                self.provider.model().to_string(),
                PROVIDER_CONFIDENCE,
                SuggestionCategory::Medication,
            ),
            Err(e) => {
                let template = fallback_for(&message.content);
                warn!(
                    provider = self.provider.name(),
                    error = %e,
                    kind = e.error_kind(),
                    "provider failed, using fallback template"
                );
                pending(
                    message,
                    template.reply.to_string(),
                    FALLBACK_MODEL.to_string(),
                    FALLBACK_CONFIDENCE,
                    template.category,
                )
            }
        }
    }
}

fn pending(
    message: &ChatMessage,
    content: String,
    model_used: String,
    confidence: f64,
    category: SuggestionCategory,
) -> Suggestion {
    Suggestion {
        id: SuggestionId::new(),
        message_id: message.id.clone(),
        patient_id: message.patient_id.clone(),
        content,
        model_used,
        confidence,
        category,
        priority: DEFAULT_PRIORITY,
        status: SuggestionStatus::Pending,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use carelink_core::models::{ChatMessage, PhysiologicalReading, Suggestion};
    use carelink_core::notify::Notifier;
    use parking_lot::Mutex;

    /// Notifier that remembers every event instead of routing it.
    #[derive(Default)]
    pub struct RecordingNotifier {
        messages: Mutex<Vec<ChatMessage>>,
        suggestions: Mutex<Vec<Suggestion>>,
        readings: Mutex<Vec<PhysiologicalReading>>,
    }

    impl RecordingNotifier {
        pub fn suggestions(&self) -> Vec<Suggestion> {
            self.suggestions.lock().clone()
        }

        pub fn readings(&self) -> Vec<PhysiologicalReading> {
            self.readings.lock().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify_new_message(&self, message: &ChatMessage) -> usize {
            self.messages.lock().push(message.clone());
            1
        }

        fn notify_new_suggestion(&self, suggestion: &Suggestion) -> usize {
            self.suggestions.lock().push(suggestion.clone());
            1
        }

        fn notify_new_physiological_reading(&self, reading: &PhysiologicalReading) -> usize {
            self.readings.lock().push(reading.clone());
            1
        }
    }
}
