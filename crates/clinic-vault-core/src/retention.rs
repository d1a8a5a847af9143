//! Day-bucketed retention: one backup per calendar day, for the most recent `N` days.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use time::{Date, PrimitiveDateTime};

use crate::model::BackupHistoryItem;
use crate::naming::wall_clock;

pub const DEFAULT_RETENTION_DAYS: usize = 5;
pub const DEFAULT_CLEANUP_PROMPT_THRESHOLD: usize = 10;

/// Anything retention can bucket by day.
pub trait Dated {
    /// Wall-clock time as recorded. Bucketing uses its date part without timezone
    /// normalization.
    fn recorded_at(&self) -> PrimitiveDateTime;
}

impl Dated for BackupHistoryItem {
    fn recorded_at(&self) -> PrimitiveDateTime {
        wall_clock(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionDecision<T> {
    /// One record per kept day, newest day first.
    pub to_keep: Vec<T>,
    /// Everything else, in input order.
    pub to_delete: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep_days: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    #[must_use]
    pub fn new(keep_days: usize) -> Self {
        Self { keep_days }
    }

    #[must_use]
    pub fn keep_days(&self) -> usize {
        self.keep_days
    }

    #[must_use]
    pub fn decide<T: Dated + Clone>(&self, records: &[T]) -> RetentionDecision<T> {
        let mut latest_per_day: BTreeMap<Date, usize> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            let at = record.recorded_at();
            match latest_per_day.entry(at.date()) {
                Entry::Vacant(slot) => {
                    slot.insert(index);
                }
                Entry::Occupied(mut slot) => {
                    // strictly later only: on ties the earlier entry in input order stays
                    if at > records[*slot.get()].recorded_at() {
                        slot.insert(index);
                    }
                }
            }
        }

        let kept: Vec<usize> = latest_per_day
            .values()
            .rev()
            .take(self.keep_days)
            .copied()
            .collect();
        let kept_set: BTreeSet<usize> = kept.iter().copied().collect();

        RetentionDecision {
            to_keep: kept.iter().map(|&index| records[index].clone()).collect(),
            to_delete: records
                .iter()
                .enumerate()
                .filter(|(index, _)| !kept_set.contains(index))
                .map(|(_, record)| record.clone())
                .collect(),
        }
    }
}

/// Whether the cleanup prompt should be offered for a history of `retained` entries.
#[must_use]
pub fn cleanup_prompt_due(retained: usize, threshold: usize) -> bool {
    threshold > 0 && retained >= threshold
}
