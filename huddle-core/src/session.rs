//! Session reducer
//!
//! Every inbound event is applied synchronously in a fixed order: roster
//! update, activity record, stage selection, subscription reconcile, layout.
//! Nothing outside the session mutates activity records or the stage.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::activity::ActivityTracker;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::layout::{LayoutEngine, LayoutGeometry, LayoutInput};
use crate::participant::{Participant, ParticipantRoster, PresenceOutcome, TrackHandles};
use crate::presence::{PresenceBroadcaster, PresenceMessage};
use crate::signaling::SignalingChannel;
use crate::stage::{StagePolicy, StageSelector, StageSet};
use crate::subscription::{
    desired_tracks, SubscriptionHandle, SubscriptionStats, TrackSubscriptionManager,
};
use crate::types::{MediaFlags, ParticipantId, TrackKind};

/// Inputs the session reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantId),
    PresenceReceived(PresenceMessage),
    TracksPublished {
        participant_id: ParticipantId,
        tracks: TrackHandles,
    },
    ViewportResized {
        width: f64,
        height: f64,
    },
    LocalFlagsChanged(MediaFlags),
    SignalingDisconnected,
    SignalingReconnected,
    /// Periodic activity refresh tick
    Refresh,
}

/// What the UI renders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub stage: StageSet,
    pub layout: Option<LayoutGeometry>,
    pub capacity: usize,
}

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub participants: usize,
    pub stage_size: usize,
    pub stage_changes: u64,
    pub presence_sent: u64,
    pub layout_computations: u64,
    pub subscriptions: SubscriptionStats,
}

pub struct Session {
    config: CoreConfig,
    channel: Box<dyn SignalingChannel>,
    roster: ParticipantRoster,
    activity: ActivityTracker,
    selector: StageSelector,
    policy: StagePolicy,
    subscriptions: TrackSubscriptionManager,
    layout_engine: LayoutEngine,
    broadcaster: PresenceBroadcaster,
    viewport: (f64, f64),
    capacity: usize,
    layout: Option<LayoutGeometry>,
    presence_sent: u64,
}

impl Session {
    pub fn new(
        local_id: ParticipantId,
        local_flags: MediaFlags,
        config: CoreConfig,
        channel: Box<dyn SignalingChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = StagePolicy::new(config.stage.clone());
        let capacity = policy.capacity_for_width(0.0);

        info!(
            local_id = %local_id,
            capacity,
            data_saver = config.subscription.data_saver,
            "Session created"
        );

        Self {
            roster: ParticipantRoster::new(local_id.clone()),
            activity: ActivityTracker::new(Arc::clone(&clock)),
            selector: StageSelector::new(),
            policy,
            subscriptions: TrackSubscriptionManager::new(),
            layout_engine: LayoutEngine::new(config.layout.target_aspect_ratio),
            broadcaster: PresenceBroadcaster::new(
                local_id,
                local_flags,
                config.presence.clone(),
                clock,
            ),
            config,
            channel,
            viewport: (0.0, 0.0),
            capacity,
            layout: None,
            presence_sent: 0,
        }
    }

    /// Apply one event and return the resulting view
    pub fn handle(&mut self, event: SessionEvent) -> SessionView {
        match event {
            SessionEvent::ParticipantJoined(participant) => {
                let id = participant.id.clone();
                let active = participant.is_active();
                if self.roster.join(participant) {
                    self.subscriptions.admit(&id);
                    if active {
                        self.activity.record_activity(&id);
                    }
                }
                self.recompute()
            }
            SessionEvent::ParticipantLeft(id) => {
                if self.roster.leave(&id).is_some() {
                    self.activity.forget(&id);
                }
                // also covers tracks of ids the roster never saw
                self.subscriptions
                    .release_participant(self.channel.as_ref(), &id);
                self.recompute()
            }
            SessionEvent::PresenceReceived(message) => {
                match self.roster.apply_presence(&message) {
                    PresenceOutcome::Applied(transition) => {
                        if transition.any() {
                            self.activity.record_activity(&message.participant_id);
                        }
                        self.recompute()
                    }
                    PresenceOutcome::Stale | PresenceOutcome::Unknown => self.view(),
                }
            }
            SessionEvent::TracksPublished {
                participant_id,
                tracks,
            } => {
                if self.roster.set_tracks(&participant_id, tracks) {
                    self.recompute()
                } else {
                    debug!(participant_id = %participant_id, "Tracks for unknown participant");
                    self.view()
                }
            }
            SessionEvent::ViewportResized { width, height } => {
                self.viewport = (width, height);
                let capacity = self.policy.capacity_for_width(width);
                if capacity != self.capacity {
                    debug!(
                        width,
                        old_capacity = self.capacity,
                        new_capacity = capacity,
                        "Stage capacity changed"
                    );
                    self.capacity = capacity;
                }
                self.recompute()
            }
            SessionEvent::LocalFlagsChanged(flags) => {
                self.broadcaster.update(flags);
                self.view()
            }
            SessionEvent::SignalingDisconnected => {
                self.broadcaster.on_disconnected();
                self.view()
            }
            SessionEvent::SignalingReconnected => {
                self.broadcaster.on_reconnected();
                self.flush_presence();
                self.view()
            }
            SessionEvent::Refresh => self.refresh(),
        }
    }

    /// Re-record continuously active participants and recompute
    pub fn refresh(&mut self) -> SessionView {
        self.activity.refresh(&self.roster);
        self.recompute()
    }

    fn recompute(&mut self) -> SessionView {
        let candidates = self.roster.candidates();
        self.selector
            .select(&candidates, &self.activity, self.capacity);

        let desired = desired_tracks(
            &self.roster,
            self.selector.current(),
            self.config.subscription.data_saver,
        );
        let outcome = self
            .subscriptions
            .reconcile(self.channel.as_ref(), &desired);
        if outcome.acquired > 0 || outcome.released > 0 {
            debug!(
                acquired = outcome.acquired,
                released = outcome.released,
                "Subscriptions reconciled"
            );
        }

        let (width, height) = self.viewport;
        self.layout = self.layout_engine.layout(LayoutInput::new(
            self.selector.current().len(),
            width,
            height,
        ));

        self.view()
    }

    /// Acquire a consumer handle for a remote track, e.g. for a mounted tile
    ///
    /// The handle shares the network subscription with the stage policy and
    /// any other holder. Returns `None` for participants not in the room.
    pub fn subscribe_track(
        &mut self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Option<SubscriptionHandle> {
        if !self.roster.contains(participant_id) {
            debug!(
                participant_id = %participant_id,
                kind = %kind,
                "Track subscribe for absent participant"
            );
            return None;
        }
        self.subscriptions
            .subscribe(self.channel.as_ref(), participant_id, kind)
    }

    /// Give back a handle from `subscribe_track`
    pub fn unsubscribe_track(&mut self, handle: SubscriptionHandle) -> bool {
        self.subscriptions
            .unsubscribe(self.channel.as_ref(), handle)
    }

    /// Send the local presence if a flush or heartbeat is due
    pub fn flush_presence(&mut self) -> Option<PresenceMessage> {
        let message = self.broadcaster.poll()?;
        match self.channel.send_presence(&message) {
            Ok(()) => self.presence_sent += 1,
            Err(e) => warn!(
                sequence = message.sequence,
                error = %e,
                "Presence send failed"
            ),
        }
        Some(message)
    }

    /// When `flush_presence` next has something to send
    #[must_use]
    pub fn next_presence_deadline(&self) -> Option<Instant> {
        self.broadcaster.next_deadline()
    }

    /// Release every subscription, used on room leave
    pub fn teardown(&mut self) -> usize {
        let released = self.subscriptions.release_all(self.channel.as_ref());
        info!(released, "Session torn down");
        released
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            stage: self.selector.current().clone(),
            layout: self.layout,
            capacity: self.capacity,
        }
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            participants: self.roster.len(),
            stage_size: self.selector.current().len(),
            stage_changes: self.selector.changes(),
            presence_sent: self.presence_sent,
            layout_computations: self.layout_engine.computations(),
            subscriptions: self.subscriptions.stats(),
        }
    }

    #[must_use]
    pub const fn roster(&self) -> &ParticipantRoster {
        &self.roster
    }

    #[must_use]
    pub const fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    #[must_use]
    pub const fn subscriptions(&self) -> &TrackSubscriptionManager {
        &self.subscriptions
    }

    #[must_use]
    pub const fn broadcaster(&self) -> &PresenceBroadcaster {
        &self.broadcaster
    }

    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }
}
