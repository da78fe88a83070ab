//! Pipeline orchestrator
//!
//! Sequences the survey phase then the submission phase. Each phase is its
//! own run cycle: it is recorded before any work starts and only marked
//! successful once every unit has been written, so a crash leaves the cycle
//! at `success = false` and the next run retries the same window.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::extract::{extract_submissions, extract_surveys, ExtractWindow};
use super::stats::{PhaseReport, RunReport};
use super::submission_loader::SubmissionFactLoader;
use super::survey_loader::SurveySnapshotLoader;
use crate::config::PipelineConfig;
use crate::error::EtlResult;
use crate::models::{PackageName, RunCycle};
use crate::store::{AnalyticsStore, RunCycleStore, SourceReader};

pub struct PipelineOrchestrator {
    source: Arc<dyn SourceReader>,
    analytics: Arc<dyn AnalyticsStore>,
    run_cycles: Arc<dyn RunCycleStore>,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        analytics: Arc<dyn AnalyticsStore>,
        run_cycles: Arc<dyn RunCycleStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            analytics,
            run_cycles,
            config,
        }
    }

    /// Survey phase, then submission phase
    ///
    /// A failed survey phase stops the run before submissions are touched.
    pub async fn run_all(&self) -> EtlResult<RunReport> {
        let mut report = RunReport::default();
        for package in PackageName::ALL {
            report.phases.push(self.run(package).await?);
        }
        Ok(report)
    }

    /// One phase wrapped in run-cycle bookkeeping
    pub async fn run(&self, package: PackageName) -> EtlResult<PhaseReport> {
        let run = self
            .run_cycles
            .begin_run(package, &format!("survey-etl {} run", package))
            .await?;

        info!(package = %package, run_cycle_id = run.id, "Run cycle started");

        match self.run_phase(package, &run).await {
            Ok(report) => {
                if !self.run_cycles.complete_run(run.id, package).await? {
                    warn!(
                        package = %package,
                        run_cycle_id = run.id,
                        "Run cycle was already marked successful"
                    );
                }
                info!(
                    package = %package,
                    run_cycle_id = run.id,
                    units = report.stats.total_units,
                    rows = report.stats.rows_written,
                    "Run cycle completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    package = %package,
                    run_cycle_id = run.id,
                    error = %e,
                    "Run failed; run cycle left unsuccessful"
                );
                Err(e)
            }
        }
    }

    async fn run_phase(&self, package: PackageName, run: &RunCycle) -> EtlResult<PhaseReport> {
        let window = ExtractWindow::resolve(self.run_cycles.as_ref(), package, run).await?;

        let stats = match package {
            PackageName::Survey => {
                let changes = extract_surveys(self.source.as_ref(), &window).await?;
                SurveySnapshotLoader::new(self.analytics.as_ref())
                    .load(changes.into_units(), run.id)
                    .await?
            }
            PackageName::Submission => {
                let changes = extract_submissions(self.source.as_ref(), &window).await?;
                SubmissionFactLoader::new(
                    self.source.as_ref(),
                    self.analytics.as_ref(),
                    &self.config,
                )
                .load(changes.into_units(), run.id)
                .await?
            }
        };

        Ok(PhaseReport {
            package,
            run_cycle_id: run.id,
            watermark: window.since,
            window_end: window.until,
            stats,
        })
    }
}
