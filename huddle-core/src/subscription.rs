//! Remote track subscription management
//!
//! Consumers acquire handles for `(participant, kind)` pairs. Handles for
//! the same pair share one network subscription, which is requested on the
//! first acquire and released when the last handle goes away. The stage
//! policy is itself one consumer, kept in sync through `reconcile`.
//!
//! Once a participant is released with `release_participant`, acquires for
//! it are refused until it is admitted again.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::participant::ParticipantRoster;
use crate::signaling::SignalingChannel;
use crate::stage::StageSet;
use crate::types::{ParticipantId, TrackKind};

/// One remote track of one participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub participant_id: ParticipantId,
    pub kind: TrackKind,
}

impl TrackKey {
    pub fn new(participant_id: impl Into<ParticipantId>, kind: TrackKind) -> Self {
        Self {
            participant_id: participant_id.into(),
            kind,
        }
    }
}

/// Counted ownership of a track subscription, consumed by `unsubscribe`
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    key: TrackKey,
}

impl SubscriptionHandle {
    #[must_use]
    pub const fn key(&self) -> &TrackKey {
        &self.key
    }
}

#[derive(Debug, Default)]
struct SubscriptionEntry {
    holders: HashSet<u64>,
}

/// Subscription statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    /// Active network subscriptions per kind
    pub audio: usize,
    pub video: usize,
    pub screen_share: usize,
    /// Requests issued to signaling since creation
    pub total_requests: u64,
    /// Releases issued to signaling since creation
    pub total_releases: u64,
}

/// Changes made by one `reconcile` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub acquired: usize,
    pub released: usize,
}

#[derive(Debug, Default)]
pub struct TrackSubscriptionManager {
    entries: HashMap<TrackKey, SubscriptionEntry>,
    /// Handles held on behalf of the stage policy
    policy_handles: BTreeMap<TrackKey, SubscriptionHandle>,
    departed: HashSet<ParticipantId>,
    next_handle: u64,
    total_requests: u64,
    total_releases: u64,
}

impl TrackSubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a handle, requesting the track on first use
    ///
    /// Returns `None` for a participant that has left.
    pub fn subscribe(
        &mut self,
        channel: &dyn SignalingChannel,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Option<SubscriptionHandle> {
        if self.departed.contains(participant_id) {
            debug!(
                participant_id = %participant_id,
                kind = %kind,
                "Ignoring subscribe for departed participant"
            );
            return None;
        }

        let key = TrackKey::new(participant_id.clone(), kind);
        self.next_handle += 1;
        let id = self.next_handle;

        let entry = self.entries.entry(key.clone()).or_default();
        if entry.holders.is_empty() {
            self.total_requests += 1;
            debug!(participant_id = %participant_id, kind = %kind, "Requesting track");
            if let Err(e) = channel.request_track(participant_id, kind) {
                warn!(
                    participant_id = %participant_id,
                    kind = %kind,
                    error = %e,
                    "Track request failed"
                );
            }
        }
        entry.holders.insert(id);

        Some(SubscriptionHandle { id, key })
    }

    /// Accept acquires for a (re)joining participant
    pub fn admit(&mut self, participant_id: &ParticipantId) {
        self.departed.remove(participant_id);
    }

    /// Give a handle back, releasing the track with the last one
    ///
    /// Handles whose subscription was already torn down are ignored.
    pub fn unsubscribe(
        &mut self,
        channel: &dyn SignalingChannel,
        handle: SubscriptionHandle,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&handle.key) else {
            return false;
        };
        if !entry.holders.remove(&handle.id) {
            return false;
        }
        if entry.holders.is_empty() {
            self.entries.remove(&handle.key);
            self.release(channel, &handle.key);
        }
        true
    }

    /// Tear down every subscription of a departed participant
    ///
    /// Outstanding handles for it become inert and later acquires are
    /// refused until `admit` is called.
    pub fn release_participant(
        &mut self,
        channel: &dyn SignalingChannel,
        participant_id: &ParticipantId,
    ) -> usize {
        self.departed.insert(participant_id.clone());
        self.policy_handles
            .retain(|key, _| key.participant_id != *participant_id);

        let mut keys: Vec<TrackKey> = self
            .entries
            .keys()
            .filter(|key| key.participant_id == *participant_id)
            .cloned()
            .collect();
        keys.sort();

        for key in &keys {
            self.entries.remove(key);
            self.release(channel, key);
        }
        keys.len()
    }

    /// Make the stage policy hold exactly the `desired` tracks
    ///
    /// Releases go out before requests so bandwidth never overshoots.
    pub fn reconcile(
        &mut self,
        channel: &dyn SignalingChannel,
        desired: &BTreeSet<TrackKey>,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let stale: Vec<TrackKey> = self
            .policy_handles
            .keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(handle) = self.policy_handles.remove(&key) {
                self.unsubscribe(channel, handle);
                outcome.released += 1;
            }
        }

        for key in desired {
            if self.policy_handles.contains_key(key) {
                continue;
            }
            if let Some(handle) = self.subscribe(channel, &key.participant_id, key.kind) {
                self.policy_handles.insert(key.clone(), handle);
                outcome.acquired += 1;
            }
        }

        outcome
    }

    /// Release everything, used on room leave
    pub fn release_all(&mut self, channel: &dyn SignalingChannel) -> usize {
        self.policy_handles.clear();
        let mut keys: Vec<TrackKey> = self.entries.drain().map(|(key, _)| key).collect();
        keys.sort();
        for key in &keys {
            self.release(channel, key);
        }
        keys.len()
    }

    fn release(&mut self, channel: &dyn SignalingChannel, key: &TrackKey) {
        self.total_releases += 1;
        debug!(participant_id = %key.participant_id, kind = %key.kind, "Releasing track");
        if let Err(e) = channel.release_track(&key.participant_id, key.kind) {
            warn!(
                participant_id = %key.participant_id,
                kind = %key.kind,
                error = %e,
                "Track release failed"
            );
        }
    }

    /// Number of live handles for a track
    #[must_use]
    pub fn refcount(&self, key: &TrackKey) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.holders.len())
    }

    #[must_use]
    pub fn is_subscribed(&self, participant_id: &ParticipantId, kind: TrackKind) -> bool {
        self.refcount(&TrackKey::new(participant_id.clone(), kind)) > 0
    }

    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let mut stats = SubscriptionStats {
            total_requests: self.total_requests,
            total_releases: self.total_releases,
            ..Default::default()
        };
        for key in self.entries.keys() {
            match key.kind {
                TrackKind::Audio => stats.audio += 1,
                TrackKind::Video => stats.video += 1,
                TrackKind::ScreenShare => stats.screen_share += 1,
            }
        }
        stats
    }
}

/// Tracks the stage policy wants subscribed
///
/// Audio for everyone present, so off-stage speakers stay audible. Video
/// and screen share only for stage members, and never in data saver mode.
/// Only published tracks are considered.
#[must_use]
pub fn desired_tracks(
    roster: &ParticipantRoster,
    stage: &StageSet,
    data_saver: bool,
) -> BTreeSet<TrackKey> {
    let mut desired = BTreeSet::new();
    for participant in roster.iter() {
        for kind in TrackKind::ALL {
            if !participant.tracks.has(kind) {
                continue;
            }
            let wanted = if kind.is_video() {
                !data_saver && stage.contains(&participant.id)
            } else {
                true
            };
            if wanted {
                desired.insert(TrackKey::new(participant.id.clone(), kind));
            }
        }
    }
    desired
}
