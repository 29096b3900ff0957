use std::sync::Arc;

use tracing::{debug, warn};

use carelink_core::envelope::Envelope;
use carelink_core::models::{ChatMessage, PhysiologicalReading, Role, Suggestion};
use carelink_core::notify::Notifier;

use crate::hub::{Hub, HubError};

/// Translates persisted domain events into hub envelopes. Holds no state
/// beyond the hub handle and never touches storage.
pub struct NotificationService {
    hub: Arc<Hub>,
}

impl NotificationService {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    fn settle(kind: &'static str, result: Result<usize, HubError>) -> usize {
        match result {
            Ok(delivered) => {
                debug!(kind, delivered, "notification queued");
                delivered
            }
            Err(e) => {
                warn!(kind, error = %e, "notification dropped");
                0
            }
        }
    }
}

impl Notifier for NotificationService {
    /// Delivered to the counterpart of the author, never back to the sender.
    fn notify_new_message(&self, message: &ChatMessage) -> usize {
        let envelope = Envelope::chat_created(message);
        Self::settle("chat", self.hub.send_to_user(message.counterpart(), &envelope))
    }

    fn notify_new_suggestion(&self, suggestion: &Suggestion) -> usize {
        let envelope = Envelope::suggestion_created(suggestion);
        Self::settle("ai_suggestion", self.hub.send_to_role(Role::Doctor, &envelope))
    }

    fn notify_new_physiological_reading(&self, reading: &PhysiologicalReading) -> usize {
        let envelope = Envelope::reading_created(reading);
        Self::settle("physiological", self.hub.send_to_role(Role::Doctor, &envelope))
    }
}
