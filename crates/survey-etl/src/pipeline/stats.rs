//! Per-phase load counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PackageName;

/// Counters for one pipeline phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadStats {
    /// Units (surveys or submissions) looked at
    pub total_units: i64,
    /// Units written for the first time
    pub units_inserted: i64,
    /// Units whose previous active version was superseded
    pub units_replaced: i64,
    /// Units deliberately not written (no snapshot yet, parked)
    pub units_skipped: i64,
    /// Units rejected by a recoverable error
    pub units_failed: i64,
    /// Question-definition or fact rows written
    pub rows_written: i64,
    /// Components without an analytics representation
    pub unknown_components: i64,
    /// Submissions newly parked in the pending queue
    pub parked: i64,
    /// Parked submissions that were loaded this run
    pub pending_resolved: i64,
    /// Parked submissions given up on
    pub pending_dropped: i64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LoadStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    /// Record a written unit; `replaced` when it superseded an active version
    pub fn inc_written(&mut self, replaced: bool) {
        if replaced {
            self.units_replaced += 1;
        } else {
            self.units_inserted += 1;
        }
        self.total_units += 1;
    }

    pub fn inc_skipped(&mut self) {
        self.units_skipped += 1;
        self.total_units += 1;
    }

    pub fn inc_failed(&mut self) {
        self.units_failed += 1;
        self.total_units += 1;
    }

    pub fn add_rows(&mut self, rows: usize) {
        self.rows_written += rows as i64;
    }

    /// Units that made it into the analytics store
    pub fn units_written(&self) -> i64 {
        self.units_inserted + self.units_replaced
    }

    pub fn has_failures(&self) -> bool {
        self.units_failed > 0
    }
}

/// Outcome of one orchestrated phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub package: PackageName,
    pub run_cycle_id: i64,
    pub watermark: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub stats: LoadStats,
}

/// Outcome of an orchestrator invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    pub fn phase(&self, package: PackageName) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.package == package)
    }

    pub fn total_rows_written(&self) -> i64 {
        self.phases.iter().map(|p| p.stats.rows_written).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_roll_up_into_total() {
        let mut stats = LoadStats::new();
        stats.inc_written(false);
        stats.inc_written(true);
        stats.inc_skipped();
        stats.inc_failed();
        stats.add_rows(4);

        assert_eq!(stats.total_units, 4);
        assert_eq!(stats.units_written(), 2);
        assert_eq!(stats.rows_written, 4);
        assert!(stats.has_failures());
    }

    #[test]
    fn test_complete_sets_duration() {
        let mut stats = LoadStats::new();
        stats.complete();
        assert!(stats.completed_at.is_some());
        assert!(stats.duration_secs >= 0.0);
    }
}
