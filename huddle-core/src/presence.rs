//! Presence broadcasting
//!
//! The local participant's media and activity flags are published to every
//! peer over signaling. Changes are coalesced with a trailing debounce, a
//! heartbeat resends the full state when nothing changes, and emission is
//! suspended while signaling is disconnected.
//!
//! ```text
//!   Idle --change--> Dirty --flush_at reached--> (send) --> Idle
//!   Idle --heartbeat elapsed--> (send) --> Idle
//!   any  --disconnect--> Suspended --reconnect--> Dirty (due now)
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::PresenceConfig;
use crate::error::Result;
use crate::types::{MediaFlags, ParticipantId};

/// A participant's self-reported state, as sent over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub participant_id: ParticipantId,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_share_enabled: bool,
    pub speaking: bool,
    pub raised_hand: bool,
    /// Increases by one per message from the same sender
    pub sequence: u64,
    /// Wall-clock send time, informational only
    pub sent_at_ms: i64,
}

impl PresenceMessage {
    #[must_use]
    pub fn new(participant_id: ParticipantId, flags: MediaFlags, sequence: u64) -> Self {
        Self {
            participant_id,
            audio_enabled: flags.audio_enabled,
            video_enabled: flags.video_enabled,
            screen_share_enabled: flags.screen_share_enabled,
            speaking: flags.speaking,
            raised_hand: flags.raised_hand,
            sequence,
            sent_at_ms: Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub const fn flags(&self) -> MediaFlags {
        MediaFlags {
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
            screen_share_enabled: self.screen_share_enabled,
            speaking: self.speaking,
            raised_hand: self.raised_hand,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Observable broadcaster state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    /// Nothing pending, waiting for a change or the heartbeat
    Idle,
    /// A flush is pending
    Dirty {
        first_change: Instant,
        flush_at: Instant,
    },
    /// Signaling is down, nothing is emitted
    Suspended,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Dirty {
        first_change: Instant,
        flush_at: Instant,
    },
}

pub struct PresenceBroadcaster {
    local_id: ParticipantId,
    config: PresenceConfig,
    clock: Arc<dyn Clock>,
    flags: MediaFlags,
    phase: Phase,
    last_sent_at: Option<Instant>,
    sequence: u64,
    connected: bool,
}

impl PresenceBroadcaster {
    /// The initial state is due immediately so peers learn it on join
    pub fn new(
        local_id: ParticipantId,
        flags: MediaFlags,
        config: PresenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            local_id,
            config,
            clock,
            flags,
            phase: Phase::Dirty {
                first_change: now,
                flush_at: now,
            },
            last_sent_at: None,
            sequence: 0,
            connected: true,
        }
    }

    /// Record the latest local flags, returning true if anything changed
    pub fn update(&mut self, flags: MediaFlags) -> bool {
        if flags == self.flags {
            return false;
        }
        self.flags = flags;

        let now = self.clock.now();
        let debounced = now + self.config.debounce();
        self.phase = match self.phase {
            Phase::Idle => Phase::Dirty {
                first_change: now,
                flush_at: debounced,
            },
            Phase::Dirty { first_change, .. } => Phase::Dirty {
                first_change,
                flush_at: debounced.min(first_change + self.config.max_debounce()),
            },
        };
        true
    }

    /// Earliest instant at which `poll` emits, `None` while suspended
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.connected {
            return None;
        }
        match self.phase {
            Phase::Dirty { flush_at, .. } => Some(flush_at),
            Phase::Idle => self
                .last_sent_at
                .map(|sent_at| sent_at + self.config.heartbeat()),
        }
    }

    /// Emit a message if a flush or heartbeat is due
    pub fn poll(&mut self) -> Option<PresenceMessage> {
        let now = self.clock.now();
        let due = self.next_deadline().is_some_and(|deadline| deadline <= now);
        if !due {
            return None;
        }

        let heartbeat = matches!(self.phase, Phase::Idle);
        self.sequence += 1;
        self.last_sent_at = Some(now);
        self.phase = Phase::Idle;

        debug!(
            sequence = self.sequence,
            heartbeat,
            flags = ?self.flags,
            "Emitting presence"
        );
        Some(PresenceMessage::new(
            self.local_id.clone(),
            self.flags,
            self.sequence,
        ))
    }

    /// Signaling went away: stop emitting, keep tracking changes
    pub fn on_disconnected(&mut self) {
        if self.connected {
            info!("Signaling disconnected, presence suspended");
            self.connected = false;
        }
    }

    /// Signaling is back: resend the full state right away
    pub fn on_reconnected(&mut self) {
        let now = self.clock.now();
        info!("Signaling reconnected, resending presence");
        self.connected = true;
        self.phase = Phase::Dirty {
            first_change: now,
            flush_at: now,
        };
    }

    #[must_use]
    pub fn state(&self) -> BroadcastState {
        if !self.connected {
            return BroadcastState::Suspended;
        }
        match self.phase {
            Phase::Idle => BroadcastState::Idle,
            Phase::Dirty {
                first_change,
                flush_at,
            } => BroadcastState::Dirty {
                first_change,
                flush_at,
            },
        }
    }

    #[must_use]
    pub const fn flags(&self) -> MediaFlags {
        self.flags
    }

    /// Number of messages emitted so far
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn config() -> PresenceConfig {
        PresenceConfig {
            debounce_ms: 150,
            max_debounce_ms: 1000,
            heartbeat_secs: 15,
        }
    }

    /// Broadcaster whose initial announcement was already sent
    fn broadcaster(flags: MediaFlags) -> (ManualClock, PresenceBroadcaster) {
        let clock = ManualClock::new();
        let mut broadcaster =
            PresenceBroadcaster::new("me".into(), flags, config(), Arc::new(clock.clone()));
        assert!(broadcaster.poll().is_some());
        (clock, broadcaster)
    }

    fn drain(
        clock: &ManualClock,
        broadcaster: &mut PresenceBroadcaster,
        step: Duration,
        steps: u32,
    ) -> Vec<PresenceMessage> {
        let mut sent = Vec::new();
        for _ in 0..steps {
            clock.advance(step);
            sent.extend(broadcaster.poll());
        }
        sent
    }

    #[test]
    fn test_initial_state_is_announced_immediately() {
        let clock = ManualClock::new();
        let flags = MediaFlags {
            audio_enabled: true,
            ..Default::default()
        };
        let mut broadcaster =
            PresenceBroadcaster::new("me".into(), flags, config(), Arc::new(clock));

        let message = broadcaster.poll().unwrap();
        assert_eq!(message.sequence, 1);
        assert!(message.audio_enabled);
        assert_eq!(broadcaster.state(), BroadcastState::Idle);
        assert!(broadcaster.poll().is_none());
    }

    #[test]
    fn test_burst_of_changes_coalesces() {
        let (clock, mut broadcaster) = broadcaster(MediaFlags::default());

        let mut flags = MediaFlags::default();
        flags.speaking = true;
        assert!(broadcaster.update(flags));
        clock.advance(Duration::from_millis(50));
        assert!(broadcaster.poll().is_none());

        flags.speaking = false;
        broadcaster.update(flags);
        clock.advance(Duration::from_millis(50));
        assert!(broadcaster.poll().is_none());

        flags.raised_hand = true;
        broadcaster.update(flags);

        let sent = drain(&clock, &mut broadcaster, Duration::from_millis(10), 30);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].flags(), flags);
        assert_eq!(sent[0].sequence, 2);
    }

    #[test]
    fn test_unchanged_flags_do_not_dirty() {
        let (_clock, mut broadcaster) = broadcaster(MediaFlags::default());
        assert!(!broadcaster.update(MediaFlags::default()));
        assert_eq!(broadcaster.state(), BroadcastState::Idle);
    }

    #[test]
    fn test_heartbeat_resends_unchanged_state() {
        let (clock, mut broadcaster) = broadcaster(MediaFlags {
            video_enabled: true,
            ..Default::default()
        });

        clock.advance(Duration::from_secs(14));
        assert!(broadcaster.poll().is_none());

        clock.advance(Duration::from_secs(1));
        let message = broadcaster.poll().unwrap();
        assert!(message.video_enabled);
        assert_eq!(message.sequence, 2);
    }

    #[test]
    fn test_continuous_toggling_is_capped() {
        let (clock, mut broadcaster) = broadcaster(MediaFlags::default());
        let mut flags = MediaFlags::default();
        let mut sent = Vec::new();

        // a change every 100ms keeps re-arming the 150ms debounce
        for _ in 0..10 {
            flags.speaking = !flags.speaking;
            broadcaster.update(flags);
            clock.advance(Duration::from_millis(100));
            sent.extend(broadcaster.poll());
        }

        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn test_disconnect_suspends_and_reconnect_resends() {
        let (clock, mut broadcaster) = broadcaster(MediaFlags::default());

        broadcaster.on_disconnected();
        assert_eq!(broadcaster.state(), BroadcastState::Suspended);
        broadcaster.update(MediaFlags {
            raised_hand: true,
            ..Default::default()
        });
        clock.advance(Duration::from_secs(60));
        assert!(broadcaster.poll().is_none());
        assert!(broadcaster.next_deadline().is_none());

        broadcaster.on_reconnected();
        let message = broadcaster.poll().unwrap();
        assert!(message.raised_hand);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let message = PresenceMessage::new(
            "alice".into(),
            MediaFlags {
                screen_share_enabled: true,
                ..Default::default()
            },
            7,
        );
        let encoded = message.encode().unwrap();
        assert!(encoded.contains("\"participantId\":\"alice\""));
        assert!(encoded.contains("\"screenShareEnabled\":true"));
        assert!(encoded.contains("\"sentAtMs\""));

        let decoded = PresenceMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(PresenceMessage::decode("{\"participantId\":1}").is_err());
    }
}
