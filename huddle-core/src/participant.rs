//! Remote participants as reported by signaling
//!
//! The roster is mutated only by inbound signaling events. Stage selection
//! and layout read it, they never write to it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::presence::PresenceMessage;
use crate::types::{MediaFlags, ParticipantId, TrackId, TrackKind};

/// Remote track handles, each independently absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackHandles {
    pub audio: Option<TrackId>,
    pub video: Option<TrackId>,
    pub screen_share: Option<TrackId>,
}

impl TrackHandles {
    #[must_use]
    pub const fn get(&self, kind: TrackKind) -> Option<&TrackId> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
            TrackKind::ScreenShare => self.screen_share.as_ref(),
        }
    }

    #[must_use]
    pub const fn has(&self, kind: TrackKind) -> bool {
        self.get(kind).is_some()
    }
}

/// A remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub flags: MediaFlags,
    pub tracks: TrackHandles,
    /// Sequence of the last presence message applied
    last_sequence: Option<u64>,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            flags: MediaFlags::default(),
            tracks: TrackHandles::default(),
            last_sequence: None,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: MediaFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_tracks(mut self, tracks: TrackHandles) -> Self {
        self.tracks = tracks;
        self
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.flags.is_active()
    }
}

/// Activity signals that switched on with one presence update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityTransition {
    pub started_speaking: bool,
    pub raised_hand: bool,
    pub started_screen_share: bool,
}

impl ActivityTransition {
    fn between(old: &MediaFlags, new: &MediaFlags) -> Self {
        Self {
            started_speaking: !old.speaking && new.speaking,
            raised_hand: !old.raised_hand && new.raised_hand,
            started_screen_share: !old.screen_share_enabled && new.screen_share_enabled,
        }
    }

    #[must_use]
    pub const fn any(&self) -> bool {
        self.started_speaking || self.raised_hand || self.started_screen_share
    }
}

/// Outcome of applying a remote presence message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceOutcome {
    Applied(ActivityTransition),
    /// Sequence not newer than the last applied one
    Stale,
    /// Participant is not (or no longer) present
    Unknown,
}

/// Present remote participants in join order
#[derive(Debug, Clone)]
pub struct ParticipantRoster {
    local_id: ParticipantId,
    participants: IndexMap<ParticipantId, Participant>,
}

impl ParticipantRoster {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            participants: IndexMap::new(),
        }
    }

    #[must_use]
    pub const fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Add a participant. A re-join replaces the data but keeps the join position.
    ///
    /// Returns false for the local participant, which is rendered outside the stage.
    pub fn join(&mut self, participant: Participant) -> bool {
        if participant.id == self.local_id {
            debug!(participant_id = %participant.id, "Ignoring join of local participant");
            return false;
        }

        if let Some(existing) = self.participants.get_mut(&participant.id) {
            debug!(participant_id = %participant.id, "Participant re-joined");
            *existing = participant;
        } else {
            debug!(participant_id = %participant.id, "Participant joined");
            self.participants.insert(participant.id.clone(), participant);
        }
        true
    }

    pub fn leave(&mut self, id: &ParticipantId) -> Option<Participant> {
        let removed = self.participants.shift_remove(id);
        if removed.is_some() {
            debug!(participant_id = %id, "Participant left");
        } else {
            debug!(participant_id = %id, "Leave for unknown participant");
        }
        removed
    }

    /// Apply a remote participant's presence broadcast
    pub fn apply_presence(&mut self, message: &PresenceMessage) -> PresenceOutcome {
        let Some(participant) = self.participants.get_mut(&message.participant_id) else {
            return PresenceOutcome::Unknown;
        };

        if participant
            .last_sequence
            .is_some_and(|last| message.sequence <= last)
        {
            debug!(
                participant_id = %message.participant_id,
                sequence = message.sequence,
                "Dropping stale presence message"
            );
            return PresenceOutcome::Stale;
        }

        let new_flags = message.flags();
        let transition = ActivityTransition::between(&participant.flags, &new_flags);
        participant.flags = new_flags;
        participant.last_sequence = Some(message.sequence);
        PresenceOutcome::Applied(transition)
    }

    /// Replace the published track handles of a participant
    pub fn set_tracks(&mut self, id: &ParticipantId, tracks: TrackHandles) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) => {
                participant.tracks = tracks;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    /// Participant ids in join order
    #[must_use]
    pub fn candidates(&self) -> Vec<ParticipantId> {
        self.participants.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(id: &str, sequence: u64, flags: MediaFlags) -> PresenceMessage {
        PresenceMessage::new(ParticipantId::from(id), flags, sequence)
    }

    fn roster() -> ParticipantRoster {
        ParticipantRoster::new(ParticipantId::from("me"))
    }

    #[test]
    fn test_join_order_survives_rejoin() {
        let mut roster = roster();
        roster.join(Participant::new("a"));
        roster.join(Participant::new("b"));
        roster.join(Participant::new("c"));

        let rejoined = Participant::new("a").with_tracks(TrackHandles {
            audio: Some(TrackId::from("a-mic")),
            ..Default::default()
        });
        roster.join(rejoined);

        let ids: Vec<_> = roster.candidates().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(roster.get(&"a".into()).unwrap().tracks.has(TrackKind::Audio));
    }

    #[test]
    fn test_local_participant_is_excluded() {
        let mut roster = roster();
        assert!(!roster.join(Participant::new("me")));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let mut roster = roster();
        roster.join(Participant::new("a"));
        assert!(roster.leave(&"ghost".into()).is_none());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_presence_reports_transitions() {
        let mut roster = roster();
        roster.join(Participant::new("a"));

        let speaking = MediaFlags {
            speaking: true,
            ..Default::default()
        };
        let outcome = roster.apply_presence(&presence("a", 1, speaking));
        let PresenceOutcome::Applied(transition) = outcome else {
            panic!("expected applied outcome, got {outcome:?}");
        };
        assert!(transition.started_speaking);
        assert!(!transition.raised_hand);

        // still speaking, no new transition
        let outcome = roster.apply_presence(&presence("a", 2, speaking));
        assert_eq!(outcome, PresenceOutcome::Applied(ActivityTransition::default()));
    }

    #[test]
    fn test_stale_presence_is_dropped() {
        let mut roster = roster();
        roster.join(Participant::new("a"));

        let hand = MediaFlags {
            raised_hand: true,
            ..Default::default()
        };
        roster.apply_presence(&presence("a", 5, hand));
        assert_eq!(
            roster.apply_presence(&presence("a", 4, MediaFlags::default())),
            PresenceOutcome::Stale
        );
        assert!(roster.get(&"a".into()).unwrap().flags.raised_hand);
    }

    #[test]
    fn test_presence_for_departed_participant() {
        let mut roster = roster();
        assert_eq!(
            roster.apply_presence(&presence("gone", 1, MediaFlags::default())),
            PresenceOutcome::Unknown
        );
    }
}
