//! Stage selection
//!
//! Picks the bounded, ordered subset of remote participants that get video
//! rendering. Selection is a pure function of the candidates, their
//! recorded activity, the previous stage and a capacity; `StageSelector`
//! only remembers the previous result between calls.
//!
//! Ranking when there are more candidates than seats:
//! 1. recorded activity, most recent first
//! 2. equal timestamps: join order
//! 3. no activity at all: previously on stage first, then join order
//!
//! Selected participants keep their previous relative order and newcomers
//! are appended in rank order, so keyed rendering stays stable.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::debug;

use crate::activity::ActivityTracker;
use crate::config::StageConfig;
use crate::types::ParticipantId;

/// Ordered participants currently on stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageSet(Vec<ParticipantId>);

impl StageSet {
    #[must_use]
    pub fn new(ids: Vec<ParticipantId>) -> Self {
        Self(ids)
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantId> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ParticipantId] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a StageSet {
    type Item = &'a ParticipantId;
    type IntoIter = std::slice::Iter<'a, ParticipantId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Select the stage for `candidates` (given in join order)
///
/// Ids in `previous` that are not candidates any more are ignored.
#[must_use]
pub fn select_stage(
    candidates: &[ParticipantId],
    activity: &ActivityTracker,
    previous: &StageSet,
    capacity: usize,
) -> StageSet {
    if candidates.len() <= capacity {
        return StageSet(candidates.to_vec());
    }

    let mut ranked: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(join_index, id)| {
            let last = activity.last_activity(id);
            let idle_newcomer = last.is_none() && !previous.contains(id);
            (last.is_none(), Reverse(last), idle_newcomer, join_index, id)
        })
        .collect();
    ranked.sort_by_key(|&(never_active, last, idle_newcomer, join_index, _)| {
        (never_active, last, idle_newcomer, join_index)
    });

    let winners: Vec<&ParticipantId> = ranked
        .into_iter()
        .take(capacity)
        .map(|(.., id)| id)
        .collect();
    let selected: HashSet<&ParticipantId> = winners.iter().copied().collect();

    let mut stage: Vec<ParticipantId> = previous
        .iter()
        .filter(|id| selected.contains(id))
        .cloned()
        .collect();
    let survivors: HashSet<&ParticipantId> = stage.iter().collect();
    let newcomers: Vec<ParticipantId> = winners
        .into_iter()
        .filter(|id| !survivors.contains(id))
        .cloned()
        .collect();
    stage.extend(newcomers);

    StageSet(stage)
}

/// Remembers the previous stage between recomputations
#[derive(Debug, Default)]
pub struct StageSelector {
    current: StageSet,
    changes: u64,
}

impl StageSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the stage, returning true when it differs from the previous one
    pub fn select(
        &mut self,
        candidates: &[ParticipantId],
        activity: &ActivityTracker,
        capacity: usize,
    ) -> bool {
        let next = select_stage(candidates, activity, &self.current, capacity);
        if next == self.current {
            return false;
        }

        debug!(
            capacity,
            candidates = candidates.len(),
            old_size = self.current.len(),
            new_size = next.len(),
            "Stage changed"
        );
        self.current = next;
        self.changes += 1;
        true
    }

    #[must_use]
    pub const fn current(&self) -> &StageSet {
        &self.current
    }

    /// Number of recomputations that changed the stage
    #[must_use]
    pub const fn changes(&self) -> u64 {
        self.changes
    }
}

/// Viewport width category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewportClass {
    Narrow,
    Wide,
}

/// Maps container width to stage capacity
#[derive(Debug, Clone)]
pub struct StagePolicy {
    config: StageConfig,
}

impl StagePolicy {
    #[must_use]
    pub const fn new(config: StageConfig) -> Self {
        Self { config }
    }

    /// Unmeasured or zero-width containers classify as narrow
    #[must_use]
    pub fn classify(&self, width: f64) -> ViewportClass {
        if width.is_finite() && width > self.config.narrow_max_width {
            ViewportClass::Wide
        } else {
            ViewportClass::Narrow
        }
    }

    #[must_use]
    pub const fn capacity_for(&self, class: ViewportClass) -> usize {
        match class {
            ViewportClass::Narrow => self.config.narrow_capacity,
            ViewportClass::Wide => self.config.wide_capacity,
        }
    }

    #[must_use]
    pub fn capacity_for_width(&self, width: f64) -> usize {
        self.capacity_for(self.classify(width))
    }
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self::new(StageConfig::default())
    }
}
