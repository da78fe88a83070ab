//! In-process store implementations
//!
//! Used by the test suite and for dry runs. Analytics rows are kept as an
//! arena of immutable versions plus "current" indexes; `is_active` is derived
//! from those indexes when rows are read back, which mirrors what the
//! Postgres implementation does with flag updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AnalyticsStore, ChangeFilter, ReplaceOutcome, RunCycleStore, SourceReader};
use crate::error::{EtlError, EtlResult};
use crate::models::{
    sentinel_watermark, PackageName, PendingSubmission, QuestionDefinition, QuestionTable,
    ResponseFact, RunCycle, SnapshotWrite, SourceSubmission, SourceSurvey, SubmissionWrite,
    SurveySnapshot, UserResponseDetail,
};

fn lock<T>(mutex: &Mutex<T>) -> EtlResult<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| EtlError::LockPoisoned)
}

// ============================================================================
// Source
// ============================================================================

#[derive(Default)]
struct SourceState {
    surveys: BTreeMap<i64, SourceSurvey>,
    submissions: BTreeMap<i64, SourceSubmission>,
    unavailable: bool,
}

/// In-memory stand-in for the engagement database
#[derive(Default)]
pub struct MemorySourceStore {
    state: Mutex<SourceState>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_survey(&self, survey: SourceSurvey) -> EtlResult<()> {
        lock(&self.state)?.surveys.insert(survey.id, survey);
        Ok(())
    }

    pub fn upsert_submission(&self, submission: SourceSubmission) -> EtlResult<()> {
        lock(&self.state)?
            .submissions
            .insert(submission.id, submission);
        Ok(())
    }

    pub fn remove_submission(&self, submission_id: i64) -> EtlResult<()> {
        lock(&self.state)?.submissions.remove(&submission_id);
        Ok(())
    }

    /// Make every read fail as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) -> EtlResult<()> {
        lock(&self.state)?.unavailable = unavailable;
        Ok(())
    }

    fn state(&self) -> EtlResult<MutexGuard<'_, SourceState>> {
        let state = lock(&self.state)?;
        if state.unavailable {
            return Err(EtlError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state)
    }
}

#[async_trait]
impl SourceReader for MemorySourceStore {
    async fn fetch_surveys(&self, filter: ChangeFilter) -> EtlResult<Vec<SourceSurvey>> {
        let state = self.state()?;
        Ok(state
            .surveys
            .values()
            .filter(|s| filter.matches(s.created_date, s.updated_date))
            .cloned()
            .collect())
    }

    async fn fetch_submissions(&self, filter: ChangeFilter) -> EtlResult<Vec<SourceSubmission>> {
        let state = self.state()?;
        Ok(state
            .submissions
            .values()
            .filter(|s| filter.matches(s.created_date, s.updated_date))
            .cloned()
            .collect())
    }

    async fn surveys_by_ids(&self, ids: &[i64]) -> EtlResult<Vec<SourceSurvey>> {
        let state = self.state()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.surveys.get(id))
            .cloned()
            .collect())
    }

    async fn submissions_by_ids(&self, ids: &[i64]) -> EtlResult<Vec<SourceSubmission>> {
        let state = self.state()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.submissions.get(id))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Analytics
// ============================================================================

struct QuestionVersion {
    id: i64,
    table: QuestionTable,
    survey_id: i64,
    engagement_id: Option<i64>,
    key: String,
    component_type: String,
    label: Option<String>,
    request_id: String,
    run_cycle_id: i64,
}

struct FactVersion {
    id: i64,
    generation: u64,
    fact: ResponseFact,
}

struct DetailVersion {
    generation: u64,
    detail: UserResponseDetail,
}

#[derive(Default)]
struct AnalyticsState {
    run_cycles: Vec<RunCycle>,
    /// Snapshot arena; a snapshot's id is its index + 1
    snapshots: Vec<SurveySnapshot>,
    /// source_survey_id -> active snapshot id
    current_snapshot: HashMap<i64, i64>,
    questions: Vec<QuestionVersion>,
    facts: Vec<FactVersion>,
    details: Vec<DetailVersion>,
    /// submission_id -> generation of its active facts
    current_generation: HashMap<i64, u64>,
    next_generation: u64,
    pending: BTreeMap<i64, PendingSubmission>,
}

impl AnalyticsState {
    fn snapshot_is_current(&self, snapshot: &SurveySnapshot) -> bool {
        self.current_snapshot.get(&snapshot.source_survey_id) == Some(&snapshot.id)
    }

    fn snapshot_view(&self, snapshot: &SurveySnapshot) -> SurveySnapshot {
        SurveySnapshot {
            is_active: self.snapshot_is_current(snapshot),
            ..snapshot.clone()
        }
    }

    fn survey_is_current(&self, survey_id: i64) -> bool {
        usize::try_from(survey_id - 1)
            .ok()
            .and_then(|idx| self.snapshots.get(idx))
            .is_some_and(|s| self.snapshot_is_current(s))
    }

    fn generation_is_current(&self, submission_id: i64, generation: u64) -> bool {
        self.current_generation.get(&submission_id) == Some(&generation)
    }
}

/// In-memory analytics database, including `etl_runcycle`
#[derive(Default)]
pub struct MemoryAnalyticsStore {
    state: Mutex<AnalyticsState>,
}

impl MemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_cycles(&self) -> EtlResult<Vec<RunCycle>> {
        Ok(lock(&self.state)?.run_cycles.clone())
    }

    /// Every snapshot ever written, in insertion order
    pub fn snapshots(&self) -> EtlResult<Vec<SurveySnapshot>> {
        let state = lock(&self.state)?;
        Ok(state.snapshots.iter().map(|s| state.snapshot_view(s)).collect())
    }

    /// All versions of one source survey, oldest first
    pub fn snapshot_history(&self, source_survey_id: i64) -> EtlResult<Vec<SurveySnapshot>> {
        Ok(self
            .snapshots()?
            .into_iter()
            .filter(|s| s.source_survey_id == source_survey_id)
            .collect())
    }

    pub fn question_definitions(&self, table: QuestionTable) -> EtlResult<Vec<QuestionDefinition>> {
        let state = lock(&self.state)?;
        Ok(state
            .questions
            .iter()
            .filter(|q| q.table == table)
            .map(|q| QuestionDefinition {
                id: q.id,
                table: q.table,
                survey_id: q.survey_id,
                engagement_id: q.engagement_id,
                key: q.key.clone(),
                component_type: q.component_type.clone(),
                label: q.label.clone(),
                request_id: q.request_id.clone(),
                is_active: state.survey_is_current(q.survey_id),
                run_cycle_id: q.run_cycle_id,
            })
            .collect())
    }

    pub fn response_facts(&self, table: QuestionTable) -> EtlResult<Vec<ResponseFact>> {
        let state = lock(&self.state)?;
        Ok(state
            .facts
            .iter()
            .filter(|f| f.fact.table == table)
            .map(|f| ResponseFact {
                is_active: state.generation_is_current(f.fact.submission_id, f.generation),
                ..f.fact.clone()
            })
            .collect())
    }

    /// Ids of the currently active facts in `table`
    pub fn active_fact_ids(&self, table: QuestionTable) -> EtlResult<Vec<i64>> {
        let state = lock(&self.state)?;
        Ok(state
            .facts
            .iter()
            .filter(|f| f.fact.table == table)
            .filter(|f| state.generation_is_current(f.fact.submission_id, f.generation))
            .map(|f| f.id)
            .collect())
    }

    pub fn user_response_details(&self) -> EtlResult<Vec<UserResponseDetail>> {
        let state = lock(&self.state)?;
        Ok(state
            .details
            .iter()
            .map(|d| UserResponseDetail {
                is_active: state.generation_is_current(d.detail.submission_id, d.generation),
                ..d.detail.clone()
            })
            .collect())
    }
}

#[async_trait]
impl RunCycleStore for MemoryAnalyticsStore {
    async fn last_successful_watermark(&self, package: PackageName) -> EtlResult<DateTime<Utc>> {
        let state = lock(&self.state)?;
        Ok(state
            .run_cycles
            .iter()
            .filter(|r| r.package_name == package && r.success)
            .filter_map(|r| r.end_time)
            .max()
            .unwrap_or_else(sentinel_watermark))
    }

    async fn begin_run(&self, package: PackageName, description: &str) -> EtlResult<RunCycle> {
        let mut state = lock(&self.state)?;
        let now = Utc::now();
        let run = RunCycle {
            id: state.run_cycles.len() as i64 + 1,
            package_name: package,
            start_time: now,
            end_time: Some(now),
            description: description.to_string(),
            success: false,
        };
        state.run_cycles.push(run.clone());
        Ok(run)
    }

    async fn complete_run(&self, run_cycle_id: i64, package: PackageName) -> EtlResult<bool> {
        let mut state = lock(&self.state)?;
        let run = state
            .run_cycles
            .iter_mut()
            .find(|r| r.id == run_cycle_id && r.package_name == package && !r.success);

        Ok(match run {
            Some(run) => {
                run.success = true;
                true
            }
            None => false,
        })
    }

    async fn recent_runs(
        &self,
        package: Option<PackageName>,
        limit: i64,
    ) -> EtlResult<Vec<RunCycle>> {
        let state = lock(&self.state)?;
        Ok(state
            .run_cycles
            .iter()
            .rev()
            .filter(|r| package.map_or(true, |p| r.package_name == p))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalyticsStore {
    async fn active_snapshot(&self, source_survey_id: i64) -> EtlResult<Option<SurveySnapshot>> {
        let state = lock(&self.state)?;
        Ok(state
            .current_snapshot
            .get(&source_survey_id)
            .and_then(|id| usize::try_from(id - 1).ok())
            .and_then(|idx| state.snapshots.get(idx))
            .map(|s| state.snapshot_view(s)))
    }

    async fn replace_survey_snapshot(&self, write: SnapshotWrite) -> EtlResult<SurveySnapshot> {
        let mut state = lock(&self.state)?;

        let snapshot = SurveySnapshot {
            id: state.snapshots.len() as i64 + 1,
            source_survey_id: write.source_survey_id,
            name: write.name,
            engagement_id: write.engagement_id,
            is_active: true,
            run_cycle_id: write.run_cycle_id,
            created_date: write.created_date,
            updated_date: write.updated_date,
        };

        for draft in write.questions {
            let id = state.questions.len() as i64 + 1;
            state.questions.push(QuestionVersion {
                id,
                table: draft.table,
                survey_id: snapshot.id,
                engagement_id: snapshot.engagement_id,
                key: draft.key,
                component_type: draft.component_type,
                label: draft.label,
                request_id: draft.request_id,
                run_cycle_id: snapshot.run_cycle_id,
            });
        }

        state.snapshots.push(snapshot.clone());
        state
            .current_snapshot
            .insert(snapshot.source_survey_id, snapshot.id);

        Ok(snapshot)
    }

    async fn replace_submission_facts(&self, write: SubmissionWrite) -> EtlResult<ReplaceOutcome> {
        let mut state = lock(&self.state)?;

        state.next_generation += 1;
        let generation = state.next_generation;
        let written = write.facts.len();

        for fact in write.facts {
            let id = state.facts.len() as i64 + 1;
            state.facts.push(FactVersion {
                id,
                generation,
                fact,
            });
        }
        state.details.push(DetailVersion {
            generation,
            detail: write.detail,
        });
        let previous = state
            .current_generation
            .insert(write.submission_id, generation);

        Ok(ReplaceOutcome {
            facts_written: written,
            superseded: previous.is_some(),
        })
    }

    async fn park_submission(&self, submission_id: i64, source_survey_id: i64) -> EtlResult<()> {
        let mut state = lock(&self.state)?;
        state
            .pending
            .entry(submission_id)
            .or_insert_with(|| PendingSubmission {
                submission_id,
                source_survey_id,
                attempts: 0,
                first_seen: Utc::now(),
                last_attempt: None,
            });
        Ok(())
    }

    async fn pending_submissions(&self, limit: i64) -> EtlResult<Vec<PendingSubmission>> {
        let state = lock(&self.state)?;
        let mut pending: Vec<_> = state.pending.values().cloned().collect();
        pending.sort_by_key(|p| (p.first_seen, p.submission_id));
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn record_pending_attempt(&self, submission_id: i64) -> EtlResult<i32> {
        let mut state = lock(&self.state)?;
        Ok(match state.pending.get_mut(&submission_id) {
            Some(entry) => {
                entry.attempts += 1;
                entry.last_attempt = Some(Utc::now());
                entry.attempts
            }
            None => 0,
        })
    }

    async fn release_pending(&self, submission_id: i64) -> EtlResult<()> {
        lock(&self.state)?.pending.remove(&submission_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::QuestionDraft;
    use chrono::TimeZone;

    fn snapshot_write(source_survey_id: i64, run_cycle_id: i64) -> SnapshotWrite {
        SnapshotWrite {
            source_survey_id,
            name: "Park feedback".to_string(),
            engagement_id: Some(3),
            run_cycle_id,
            created_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_date: None,
            questions: vec![QuestionDraft {
                table: QuestionTable::Radio,
                key: "q1".to_string(),
                component_type: "radio".to_string(),
                label: Some("Do you like it?".to_string()),
                request_id: "c1".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_replacing_snapshot_keeps_history() {
        let store = MemoryAnalyticsStore::new();
        let first = store.replace_survey_snapshot(snapshot_write(7, 1)).await.unwrap();
        let second = store.replace_survey_snapshot(snapshot_write(7, 2)).await.unwrap();

        let history = store.snapshot_history(7).unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_active);
        assert!(history[1].is_active);
        assert_eq!(store.active_snapshot(7).await.unwrap().unwrap().id, second.id);

        let questions = store.question_definitions(QuestionTable::Radio).unwrap();
        let active: Vec<_> = questions.iter().filter(|q| q.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].survey_id, second.id);
        assert!(questions.iter().any(|q| q.survey_id == first.id && !q.is_active));
    }

    #[tokio::test]
    async fn test_complete_run_is_idempotent() {
        let store = MemoryAnalyticsStore::new();
        let run = store.begin_run(PackageName::Survey, "test").await.unwrap();

        assert!(store.complete_run(run.id, PackageName::Survey).await.unwrap());
        assert!(!store.complete_run(run.id, PackageName::Survey).await.unwrap());
        assert!(!store.complete_run(run.id, PackageName::Submission).await.unwrap());
    }

    #[tokio::test]
    async fn test_watermark_ignores_unfinished_runs() {
        let store = MemoryAnalyticsStore::new();
        assert_eq!(
            store.last_successful_watermark(PackageName::Survey).await.unwrap(),
            sentinel_watermark()
        );

        let done = store.begin_run(PackageName::Survey, "ok").await.unwrap();
        store.complete_run(done.id, PackageName::Survey).await.unwrap();
        let _crashed = store.begin_run(PackageName::Survey, "crashed").await.unwrap();

        assert_eq!(
            store.last_successful_watermark(PackageName::Survey).await.unwrap(),
            done.end_time.unwrap()
        );
        assert_eq!(
            store.last_successful_watermark(PackageName::Submission).await.unwrap(),
            sentinel_watermark()
        );
    }

    #[tokio::test]
    async fn test_pending_queue_lifecycle() {
        let store = MemoryAnalyticsStore::new();
        store.park_submission(100, 7).await.unwrap();
        store.park_submission(100, 7).await.unwrap();

        assert_eq!(store.pending_submissions(10).await.unwrap().len(), 1);
        assert_eq!(store.record_pending_attempt(100).await.unwrap(), 1);
        assert_eq!(store.record_pending_attempt(100).await.unwrap(), 2);

        store.release_pending(100).await.unwrap();
        assert!(store.pending_submissions(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_source_fails_reads() {
        let source = MemorySourceStore::new();
        source.set_unavailable(true).unwrap();
        let filter = ChangeFilter::Created {
            since: sentinel_watermark(),
            until: Utc::now(),
        };
        assert!(matches!(
            source.fetch_surveys(filter).await,
            Err(EtlError::Database(_))
        ));
    }
}
