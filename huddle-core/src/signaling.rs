//! Outbound side of the signaling collaborator
//!
//! The session core writes to signaling in exactly three ways: publishing
//! the local presence, and requesting or releasing a remote track. Delivery
//! and reconnection are the collaborator's business; the core never retries.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::presence::PresenceMessage;
use crate::types::{ParticipantId, TrackKind};

#[cfg_attr(test, mockall::automock)]
pub trait SignalingChannel: Send {
    fn send_presence(&self, message: &PresenceMessage) -> Result<()>;

    fn request_track(&self, participant_id: &ParticipantId, kind: TrackKind) -> Result<()>;

    fn release_track(&self, participant_id: &ParticipantId, kind: TrackKind) -> Result<()>;
}

/// Signals emitted to the shell, which forwards them over its transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundSignal {
    Presence(PresenceMessage),
    RequestTrack {
        participant_id: ParticipantId,
        kind: TrackKind,
    },
    ReleaseTrack {
        participant_id: ParticipantId,
        kind: TrackKind,
    },
}

impl SignalingChannel for mpsc::UnboundedSender<OutboundSignal> {
    fn send_presence(&self, message: &PresenceMessage) -> Result<()> {
        self.send(OutboundSignal::Presence(message.clone()))
            .map_err(|e| Error::Signaling(e.to_string()))
    }

    fn request_track(&self, participant_id: &ParticipantId, kind: TrackKind) -> Result<()> {
        self.send(OutboundSignal::RequestTrack {
            participant_id: participant_id.clone(),
            kind,
        })
        .map_err(|e| Error::Signaling(e.to_string()))
    }

    fn release_track(&self, participant_id: &ParticipantId, kind: TrackKind) -> Result<()> {
        self.send(OutboundSignal::ReleaseTrack {
            participant_id: participant_id.clone(),
            kind,
        })
        .map_err(|e| Error::Signaling(e.to_string()))
    }
}
