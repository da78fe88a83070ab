//! Watermark resolution and change extraction

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::EtlResult;
use crate::models::{sentinel_watermark, PackageName, RunCycle, SourceSubmission, SourceSurvey};
use crate::store::{ChangeFilter, RunCycleStore, SourceReader};

/// The `(since, until]` slice of source history a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl ExtractWindow {
    /// Window for `run`: from the package's last good watermark up to the
    /// end time stamped on the run when it began
    pub async fn resolve(
        run_cycles: &dyn RunCycleStore,
        package: PackageName,
        run: &RunCycle,
    ) -> EtlResult<Self> {
        let since = run_cycles.last_successful_watermark(package).await?;
        let until = run.end_time.unwrap_or(run.start_time);
        Ok(Self { since, until })
    }

    pub fn is_initial(&self) -> bool {
        self.since == sentinel_watermark()
    }

    pub fn created(&self) -> ChangeFilter {
        ChangeFilter::Created {
            since: self.since,
            until: self.until,
        }
    }

    /// `None` on the first run: every row is new, so there is nothing to
    /// treat as an update
    pub fn updated(&self) -> Option<ChangeFilter> {
        (!self.is_initial()).then_some(ChangeFilter::Updated {
            since: self.since,
            until: self.until,
        })
    }
}

/// Source rows addressable by id
pub trait SourceRow {
    fn source_id(&self) -> i64;
}

impl SourceRow for SourceSurvey {
    fn source_id(&self) -> i64 {
        self.id
    }
}

impl SourceRow for SourceSubmission {
    fn source_id(&self) -> i64 {
        self.id
    }
}

/// New and updated rows selected for a window
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<T> {
    pub created: Vec<T>,
    pub updated: Vec<T>,
}

impl<T: SourceRow> ChangeSet<T> {
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }

    /// Created rows then updated rows, each id at most once
    pub fn into_units(self) -> Vec<T> {
        let mut seen = HashSet::new();
        self.created
            .into_iter()
            .chain(self.updated)
            .filter(|row| seen.insert(row.source_id()))
            .collect()
    }
}

pub async fn extract_surveys(
    reader: &dyn SourceReader,
    window: &ExtractWindow,
) -> EtlResult<ChangeSet<SourceSurvey>> {
    let created = reader.fetch_surveys(window.created()).await?;
    let updated = match window.updated() {
        Some(filter) => reader.fetch_surveys(filter).await?,
        None => {
            debug!("Initial window; skipping updated surveys query");
            Vec::new()
        }
    };

    info!(
        since = %window.since,
        until = %window.until,
        created = created.len(),
        updated = updated.len(),
        "Extracted changed surveys"
    );
    Ok(ChangeSet { created, updated })
}

pub async fn extract_submissions(
    reader: &dyn SourceReader,
    window: &ExtractWindow,
) -> EtlResult<ChangeSet<SourceSubmission>> {
    let created = reader.fetch_submissions(window.created()).await?;
    let updated = match window.updated() {
        Some(filter) => reader.fetch_submissions(filter).await?,
        None => {
            debug!("Initial window; skipping updated submissions query");
            Vec::new()
        }
    };

    info!(
        since = %window.since,
        until = %window.until,
        created = created.len(),
        updated = updated.len(),
        "Extracted changed submissions"
    );
    Ok(ChangeSet { created, updated })
}
