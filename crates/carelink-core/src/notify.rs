use crate::models::{ChatMessage, PhysiologicalReading, Suggestion};

/// Delivery side of the domain: called after a successful write so that
/// persistence stays decoupled from who is connected.
///
/// Every method returns the number of connections the event was queued on.
pub trait Notifier: Send + Sync {
    fn notify_new_message(&self, message: &ChatMessage) -> usize;
    fn notify_new_suggestion(&self, suggestion: &Suggestion) -> usize;
    fn notify_new_physiological_reading(&self, reading: &PhysiologicalReading) -> usize;
}
