//! Relay for envelopes that clients push over their own socket.

use std::sync::Arc;

use tracing::{debug, warn};

use carelink_core::envelope::{Action, Envelope};
use carelink_core::ids::UserId;
use carelink_core::models::Role;

use crate::connection::{Connection, FrameHandler};
use crate::hub::Hub;

/// Forwards live client frames to the other party of the conversation.
///
/// - `chat/created` from a doctor socket goes to `payload.patientId`, from a
///   patient socket to `payload.doctorId`. The sending connection's role
///   decides, never the role claimed in the payload.
/// - `physiological/created` goes to `payload.doctorId` when present.
/// - Everything else is ignored.
pub struct Relay {
    hub: Arc<Hub>,
}

impl Relay {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    fn target<'a>(from: &Connection, envelope: &'a Envelope) -> Option<&'a UserId> {
        match envelope {
            Envelope::Chat {
                action: Action::Created,
                payload,
            } => Some(match from.role() {
                Role::Doctor => &payload.patient_id,
                Role::Patient => &payload.doctor_id,
            }),
            Envelope::Physiological {
                action: Action::Created,
                payload,
            } => payload.doctor_id.as_ref(),
            _ => None,
        }
    }
}

impl FrameHandler for Relay {
    fn on_envelope(&self, from: &Connection, envelope: Envelope) {
        let Some(target) = Self::target(from, &envelope) else {
            debug!(
                connection_id = %from.id(),
                kind = envelope.type_name(),
                action = ?envelope.action(),
                "envelope not relayed"
            );
            return;
        };

        match self.hub.send_to_user(target, &envelope) {
            Ok(delivered) => debug!(
                connection_id = %from.id(),
                target = %target,
                kind = envelope.type_name(),
                delivered,
                "envelope relayed"
            ),
            Err(e) => warn!(connection_id = %from.id(), error = %e, "relay failed"),
        }
    }
}
