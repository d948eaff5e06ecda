//! Recency record of interesting participant events
//!
//! Speaking, raising a hand and screen sharing count as activity. Records
//! never expire: staleness is judged by comparing timestamps, so a
//! participant who stays active has to be re-recorded on every refresh
//! tick to keep outranking someone who was active only once.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;

use crate::clock::Clock;
use crate::participant::ParticipantRoster;
use crate::types::ParticipantId;

pub struct ActivityTracker {
    clock: Arc<dyn Clock>,
    last_activity: HashMap<ParticipantId, Instant>,
}

impl ActivityTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_activity: HashMap::new(),
        }
    }

    /// Mark a participant active as of now
    pub fn record_activity(&mut self, id: &ParticipantId) {
        let now = self.clock.now();
        trace!(participant_id = %id, "Recording activity");
        match self.last_activity.get_mut(id) {
            Some(at) => *at = now,
            None => {
                self.last_activity.insert(id.clone(), now);
            }
        }
    }

    /// Re-record every participant whose activity condition currently holds
    ///
    /// Returns how many participants were recorded.
    pub fn refresh(&mut self, roster: &ParticipantRoster) -> usize {
        let mut recorded = 0;
        for participant in roster.iter().filter(|p| p.is_active()) {
            self.record_activity(&participant.id);
            recorded += 1;
        }
        recorded
    }

    /// Drop the record of a departed participant
    pub fn forget(&mut self, id: &ParticipantId) {
        self.last_activity.remove(id);
    }

    /// `None` means never recorded active this session
    #[must_use]
    pub fn last_activity(&self, id: &ParticipantId) -> Option<Instant> {
        self.last_activity.get(id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.last_activity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_activity.is_empty()
    }
}
