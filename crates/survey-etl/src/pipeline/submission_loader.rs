//! Submission fact loading
//!
//! Each submission is resolved against the active snapshot of its survey,
//! fanned out into fact rows and written as one replace. Submissions that
//! arrive before their survey has been snapshotted are parked and retried at
//! the start of later runs.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::component::{ClassifiedComponent, ComponentKind};
use super::stats::LoadStats;
use super::transform::{AnswerTransformer, FactContext};
use crate::config::PipelineConfig;
use crate::error::{EtlError, EtlResult};
use crate::models::{
    FormSchema, SourceSubmission, SourceSurvey, SubmissionWrite, SurveySnapshot,
    UserResponseDetail,
};
use crate::store::{AnalyticsStore, ReplaceOutcome, SourceReader};

/// What happened to one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Written(ReplaceOutcome),
    /// The survey has no active snapshot yet
    NoSnapshot,
}

/// Active snapshot plus the form it was taken from
struct SurveyContext {
    snapshot: SurveySnapshot,
    schema: FormSchema,
}

/// Per-load cache keyed by source survey id
///
/// Snapshots cannot change while the submission phase runs, so a miss is
/// cached as well.
#[derive(Default)]
struct SurveyCache {
    surveys: HashMap<i64, Option<SurveyContext>>,
}

pub struct SubmissionFactLoader<'a> {
    source: &'a dyn SourceReader,
    analytics: &'a dyn AnalyticsStore,
    config: &'a PipelineConfig,
}

impl<'a> SubmissionFactLoader<'a> {
    pub fn new(
        source: &'a dyn SourceReader,
        analytics: &'a dyn AnalyticsStore,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            source,
            analytics,
            config,
        }
    }

    /// Retry parked submissions, then load `submissions`
    pub async fn load(
        &self,
        submissions: Vec<SourceSubmission>,
        run_cycle_id: i64,
    ) -> EtlResult<LoadStats> {
        let mut stats = LoadStats::new();
        let mut cache = SurveyCache::default();

        let retried = self
            .retry_pending(run_cycle_id, &mut cache, &mut stats)
            .await?;

        for submission in submissions {
            if retried.contains(&submission.id) {
                continue;
            }

            match self.process(&submission, run_cycle_id, &mut cache).await {
                Ok(SubmissionOutcome::Written(outcome)) => {
                    // Parked rows past the retry limit can come back through their own window
                    self.analytics.release_pending(submission.id).await?;
                    stats.inc_written(outcome.superseded);
                    stats.add_rows(outcome.facts_written);
                }
                Ok(SubmissionOutcome::NoSnapshot) => {
                    warn!(
                        submission_id = submission.id,
                        source_survey_id = submission.survey_id,
                        "No active snapshot for survey; parking submission"
                    );
                    self.analytics
                        .park_submission(submission.id, submission.survey_id)
                        .await?;
                    stats.parked += 1;
                    stats.inc_skipped();
                }
                Err(e) if e.is_unit_recoverable() => {
                    warn!(submission_id = submission.id, error = %e, "Skipping submission");
                    stats.inc_failed();
                }
                Err(e) => return Err(e),
            }
        }

        stats.complete();
        info!(
            run_cycle_id,
            inserted = stats.units_inserted,
            replaced = stats.units_replaced,
            parked = stats.parked,
            failed = stats.units_failed,
            facts = stats.rows_written,
            pending_resolved = stats.pending_resolved,
            pending_dropped = stats.pending_dropped,
            duration_secs = stats.duration_secs,
            "Submission facts loaded"
        );
        Ok(stats)
    }

    /// Give parked submissions another go
    ///
    /// Returns the ids that were looked at so the main batch does not
    /// process them twice.
    async fn retry_pending(
        &self,
        run_cycle_id: i64,
        cache: &mut SurveyCache,
        stats: &mut LoadStats,
    ) -> EtlResult<HashSet<i64>> {
        let pending = self
            .analytics
            .pending_submissions(self.config.pending_retry_limit)
            .await?;
        if pending.is_empty() {
            return Ok(HashSet::new());
        }

        let ids: Vec<i64> = pending.iter().map(|p| p.submission_id).collect();
        let mut found: HashMap<i64, SourceSubmission> = self
            .source
            .submissions_by_ids(&ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        debug!(pending = pending.len(), found = found.len(), "Retrying parked submissions");

        let mut handled = HashSet::new();
        for entry in pending {
            let Some(submission) = found.remove(&entry.submission_id) else {
                warn!(
                    submission_id = entry.submission_id,
                    "Parked submission no longer exists upstream; dropping"
                );
                self.analytics.release_pending(entry.submission_id).await?;
                stats.pending_dropped += 1;
                continue;
            };
            handled.insert(submission.id);

            match self.process(&submission, run_cycle_id, cache).await {
                Ok(SubmissionOutcome::Written(outcome)) => {
                    self.analytics.release_pending(submission.id).await?;
                    stats.pending_resolved += 1;
                    stats.inc_written(outcome.superseded);
                    stats.add_rows(outcome.facts_written);
                }
                Ok(SubmissionOutcome::NoSnapshot) => {
                    let attempts = self.analytics.record_pending_attempt(submission.id).await?;
                    if attempts >= self.config.pending_max_attempts {
                        warn!(
                            submission_id = submission.id,
                            source_survey_id = submission.survey_id,
                            attempts,
                            "Parked submission exhausted its retries; dropping"
                        );
                        self.analytics.release_pending(submission.id).await?;
                        stats.pending_dropped += 1;
                    }
                }
                Err(e) if e.is_unit_recoverable() => {
                    warn!(submission_id = submission.id, error = %e, "Dropping parked submission");
                    self.analytics.release_pending(submission.id).await?;
                    stats.pending_dropped += 1;
                    stats.inc_failed();
                }
                Err(e) => return Err(e),
            }
        }

        Ok(handled)
    }

    async fn process(
        &self,
        submission: &SourceSubmission,
        run_cycle_id: i64,
        cache: &mut SurveyCache,
    ) -> EtlResult<SubmissionOutcome> {
        // Reject malformed payloads before any lookups
        submission.answers()?;

        let Some(survey) = self.survey_context(submission.survey_id, cache).await? else {
            return Ok(SubmissionOutcome::NoSnapshot);
        };

        let transformer =
            AnswerTransformer::new(FactContext::new(submission, &survey.snapshot, run_cycle_id));

        let mut facts = Vec::new();
        for component in survey.schema.questions() {
            let question = ClassifiedComponent::new(component);
            if question.kind == ComponentKind::Unknown {
                continue;
            }
            if let Some(answer) = submission.answer_for(&component.key)? {
                facts.extend(transformer.transform(&question, answer));
            }
        }

        let context = transformer.context();
        let write = SubmissionWrite {
            submission_id: submission.id,
            detail: UserResponseDetail {
                submission_id: submission.id,
                survey_id: context.survey_id,
                engagement_id: context.engagement_id,
                user_id: context.user_id,
                is_active: true,
                run_cycle_id,
                created_date: context.created_date,
                updated_date: context.updated_date,
            },
            facts,
        };

        let outcome = self.analytics.replace_submission_facts(write).await?;
        debug!(
            submission_id = submission.id,
            snapshot_id = survey.snapshot.id,
            facts = outcome.facts_written,
            superseded = outcome.superseded,
            "Submission loaded"
        );
        Ok(SubmissionOutcome::Written(outcome))
    }

    /// Resolve the active snapshot and its form for a source survey
    async fn survey_context<'c>(
        &self,
        source_survey_id: i64,
        cache: &'c mut SurveyCache,
    ) -> EtlResult<Option<&'c SurveyContext>> {
        if !cache.surveys.contains_key(&source_survey_id) {
            let context = self.fetch_survey_context(source_survey_id).await?;
            cache.surveys.insert(source_survey_id, context);
        }

        Ok(cache
            .surveys
            .get(&source_survey_id)
            .and_then(|context| context.as_ref()))
    }

    async fn fetch_survey_context(
        &self,
        source_survey_id: i64,
    ) -> EtlResult<Option<SurveyContext>> {
        let Some(snapshot) = self.analytics.active_snapshot(source_survey_id).await? else {
            return Ok(None);
        };

        let survey = self
            .source
            .surveys_by_ids(&[source_survey_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EtlError::missing_schema(source_survey_id, "survey no longer exists upstream")
            })?;

        if form_drifted(&survey, &snapshot) {
            warn!(
                source_survey_id,
                snapshot_id = snapshot.id,
                "Survey changed upstream after its active snapshot; facts follow the newer form"
            );
        }

        Ok(Some(SurveyContext {
            snapshot,
            schema: survey.form_schema()?,
        }))
    }
}

/// The source survey was edited after the snapshot was taken
fn form_drifted(survey: &SourceSurvey, snapshot: &SurveySnapshot) -> bool {
    match (survey.updated_date, snapshot.updated_date) {
        (Some(upstream), Some(snapshotted)) => upstream > snapshotted,
        (Some(upstream), None) => upstream != survey.created_date,
        (None, _) => false,
    }
}
