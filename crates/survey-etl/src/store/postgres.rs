//! PostgreSQL store implementations
//!
//! The source database stores its timestamps as `timestamp without time zone`
//! in UTC, so they are converted on the way out and watermarks are bound as
//! naive UTC values. The analytics schema uses `TIMESTAMPTZ` throughout.
//!
//! Every `replace_*` call runs in its own transaction: a crash mid-batch
//! leaves whole surveys and submissions behind, never half of one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use super::{AnalyticsStore, ChangeFilter, ReplaceOutcome, RunCycleStore, SourceReader};
use crate::error::EtlResult;
use crate::models::{
    sentinel_watermark, PackageName, PendingSubmission, QuestionTable, RunCycle, SnapshotWrite,
    SourceSubmission, SourceSurvey, SubmissionWrite, SurveySnapshot,
};

const SURVEY_COLUMNS: &str = r#"
    id::BIGINT AS id,
    name,
    engagement_id::BIGINT AS engagement_id,
    form_json::JSONB AS form_json,
    (created_date AT TIME ZONE 'UTC') AS created_date,
    (updated_date AT TIME ZONE 'UTC') AS updated_date
"#;

const SUBMISSION_COLUMNS: &str = r#"
    id::BIGINT AS id,
    survey_id::BIGINT AS survey_id,
    user_id::BIGINT AS user_id,
    submission_json::JSONB AS submission_json,
    (created_date AT TIME ZONE 'UTC') AS created_date,
    (updated_date AT TIME ZONE 'UTC') AS updated_date
"#;

/// `WHERE` clause for a change filter; `$1`/`$2` are the window bounds
fn change_predicate(filter: &ChangeFilter) -> &'static str {
    match filter {
        ChangeFilter::Created { .. } => "created_date > $1 AND created_date <= $2",
        ChangeFilter::Updated { .. } => {
            "updated_date > $1 AND updated_date <= $2 AND updated_date <> created_date"
        }
    }
}

fn window_bounds(filter: &ChangeFilter) -> (chrono::NaiveDateTime, chrono::NaiveDateTime) {
    match *filter {
        ChangeFilter::Created { since, until } | ChangeFilter::Updated { since, until } => {
            (since.naive_utc(), until.naive_utc())
        }
    }
}

// ============================================================================
// Source
// ============================================================================

/// Change queries against the engagement database
#[derive(Clone)]
pub struct PgSourceReader {
    pool: PgPool,
}

impl PgSourceReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceReader for PgSourceReader {
    #[instrument(skip(self))]
    async fn fetch_surveys(&self, filter: ChangeFilter) -> EtlResult<Vec<SourceSurvey>> {
        let (since, until) = window_bounds(&filter);
        let sql = format!(
            "SELECT {} FROM survey WHERE {} ORDER BY id",
            SURVEY_COLUMNS,
            change_predicate(&filter)
        );

        let surveys = sqlx::query_as::<_, SourceSurvey>(&sql)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = surveys.len(), "Fetched surveys");
        Ok(surveys)
    }

    #[instrument(skip(self))]
    async fn fetch_submissions(&self, filter: ChangeFilter) -> EtlResult<Vec<SourceSubmission>> {
        let (since, until) = window_bounds(&filter);
        let sql = format!(
            "SELECT {} FROM submission WHERE {} ORDER BY id",
            SUBMISSION_COLUMNS,
            change_predicate(&filter)
        );

        let submissions = sqlx::query_as::<_, SourceSubmission>(&sql)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = submissions.len(), "Fetched submissions");
        Ok(submissions)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn surveys_by_ids(&self, ids: &[i64]) -> EtlResult<Vec<SourceSurvey>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM survey WHERE id::BIGINT = ANY($1) ORDER BY id",
            SURVEY_COLUMNS
        );

        let surveys = sqlx::query_as::<_, SourceSurvey>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(surveys)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn submissions_by_ids(&self, ids: &[i64]) -> EtlResult<Vec<SourceSubmission>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM submission WHERE id::BIGINT = ANY($1) ORDER BY id",
            SUBMISSION_COLUMNS
        );

        let submissions = sqlx::query_as::<_, SourceSubmission>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(submissions)
    }
}

// ============================================================================
// Analytics
// ============================================================================

/// The analytics database, including `etl_runcycle`
#[derive(Clone)]
pub struct PgAnalyticsStore {
    pool: PgPool,
}

impl PgAnalyticsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn run_cycle_from_row(row: &PgRow) -> EtlResult<RunCycle> {
    let package: String = row.try_get("packagename")?;

    Ok(RunCycle {
        id: row.try_get("id")?,
        package_name: package.parse()?,
        start_time: row.try_get("startdatetime")?,
        end_time: row.try_get("enddatetime")?,
        description: row.try_get("description")?,
        success: row.try_get("success")?,
    })
}

async fn deactivate_questions(
    tx: &mut Transaction<'_, Postgres>,
    survey_id: i64,
) -> EtlResult<u64> {
    let mut deactivated = 0;
    for table in QuestionTable::ALL {
        let sql = format!(
            "UPDATE {} SET is_active = FALSE WHERE survey_id = $1 AND is_active",
            table.request_table()
        );
        deactivated += sqlx::query(&sql)
            .bind(survey_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
    }
    Ok(deactivated)
}

/// Returns `(facts, details)` deactivated
async fn deactivate_facts(
    tx: &mut Transaction<'_, Postgres>,
    submission_id: i64,
) -> EtlResult<(u64, u64)> {
    let mut deactivated = 0;
    for table in QuestionTable::ALL {
        let sql = format!(
            "UPDATE {} SET is_active = FALSE WHERE submission_id = $1 AND is_active",
            table.response_table()
        );
        deactivated += sqlx::query(&sql)
            .bind(submission_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
    }

    let details = sqlx::query(
        "UPDATE user_response_detail SET is_active = FALSE WHERE submission_id = $1 AND is_active",
    )
    .bind(submission_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok((deactivated, details))
}

#[async_trait]
impl RunCycleStore for PgAnalyticsStore {
    #[instrument(skip(self))]
    async fn last_successful_watermark(&self, package: PackageName) -> EtlResult<DateTime<Utc>> {
        let watermark: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(enddatetime)
            FROM etl_runcycle
            WHERE packagename = $1 AND success
            "#,
        )
        .bind(package.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(watermark.unwrap_or_else(sentinel_watermark))
    }

    #[instrument(skip(self))]
    async fn begin_run(&self, package: PackageName, description: &str) -> EtlResult<RunCycle> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO etl_runcycle (packagename, startdatetime, enddatetime, description, success)
            VALUES ($1, $2, $2, $3, FALSE)
            RETURNING id, packagename, startdatetime, enddatetime, description, success
            "#,
        )
        .bind(package.as_str())
        .bind(now)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        run_cycle_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn complete_run(&self, run_cycle_id: i64, package: PackageName) -> EtlResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE etl_runcycle
            SET success = TRUE
            WHERE id = $1 AND packagename = $2 AND NOT success
            "#,
        )
        .bind(run_cycle_id)
        .bind(package.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn recent_runs(
        &self,
        package: Option<PackageName>,
        limit: i64,
    ) -> EtlResult<Vec<RunCycle>> {
        let rows = sqlx::query(
            r#"
            SELECT id, packagename, startdatetime, enddatetime, description, success
            FROM etl_runcycle
            WHERE ($1::TEXT IS NULL OR packagename = $1)
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(package.map(|p| p.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(run_cycle_from_row).collect()
    }
}

#[async_trait]
impl AnalyticsStore for PgAnalyticsStore {
    #[instrument(skip(self))]
    async fn active_snapshot(&self, source_survey_id: i64) -> EtlResult<Option<SurveySnapshot>> {
        let snapshot = sqlx::query_as::<_, SurveySnapshot>(
            r#"
            SELECT id, source_survey_id, name, engagement_id, is_active,
                   runcycle_id AS run_cycle_id, created_date, updated_date
            FROM survey
            WHERE source_survey_id = $1 AND is_active
            "#,
        )
        .bind(source_survey_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snapshot)
    }

    #[instrument(skip(self, write), fields(source_survey_id = write.source_survey_id))]
    async fn replace_survey_snapshot(&self, write: SnapshotWrite) -> EtlResult<SurveySnapshot> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM survey WHERE source_survey_id = $1 AND is_active FOR UPDATE",
        )
        .bind(write.source_survey_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(previous_id) = previous {
            sqlx::query("UPDATE survey SET is_active = FALSE WHERE id = $1")
                .bind(previous_id)
                .execute(&mut *tx)
                .await?;
            let questions = deactivate_questions(&mut tx, previous_id).await?;
            debug!(previous_id, questions, "Deactivated previous snapshot");
        }

        let snapshot = sqlx::query_as::<_, SurveySnapshot>(
            r#"
            INSERT INTO survey (source_survey_id, name, engagement_id, is_active,
                                runcycle_id, created_date, updated_date)
            VALUES ($1, $2, $3, TRUE, $4, $5, $6)
            RETURNING id, source_survey_id, name, engagement_id, is_active,
                      runcycle_id AS run_cycle_id, created_date, updated_date
            "#,
        )
        .bind(write.source_survey_id)
        .bind(&write.name)
        .bind(write.engagement_id)
        .bind(write.run_cycle_id)
        .bind(write.created_date)
        .bind(write.updated_date)
        .fetch_one(&mut *tx)
        .await?;

        for question in &write.questions {
            let sql = format!(
                r#"
                INSERT INTO {} (survey_id, engagement_id, key, type, label,
                                request_id, is_active, runcycle_id)
                VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
                "#,
                question.table.request_table()
            );
            sqlx::query(&sql)
                .bind(snapshot.id)
                .bind(snapshot.engagement_id)
                .bind(&question.key)
                .bind(&question.component_type)
                .bind(&question.label)
                .bind(&question.request_id)
                .bind(snapshot.run_cycle_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(
            snapshot_id = snapshot.id,
            questions = write.questions.len(),
            "Inserted survey snapshot"
        );
        Ok(snapshot)
    }

    #[instrument(skip(self, write), fields(submission_id = write.submission_id))]
    async fn replace_submission_facts(&self, write: SubmissionWrite) -> EtlResult<ReplaceOutcome> {
        let mut tx = self.pool.begin().await?;

        let (deactivated, details) = deactivate_facts(&mut tx, write.submission_id).await?;

        let detail = &write.detail;
        sqlx::query(
            r#"
            INSERT INTO user_response_detail (submission_id, survey_id, engagement_id, user_id,
                                              is_active, runcycle_id, created_date, updated_date)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7)
            "#,
        )
        .bind(detail.submission_id)
        .bind(detail.survey_id)
        .bind(detail.engagement_id)
        .bind(detail.user_id)
        .bind(detail.run_cycle_id)
        .bind(detail.created_date)
        .bind(detail.updated_date)
        .execute(&mut *tx)
        .await?;

        for fact in &write.facts {
            let sql = format!(
                r#"
                INSERT INTO {} (submission_id, request_id, request_key, survey_id, engagement_id,
                                user_id, value, is_active, runcycle_id, created_date, updated_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $9, $10)
                "#,
                fact.table.response_table()
            );
            sqlx::query(&sql)
                .bind(fact.submission_id)
                .bind(&fact.request_id)
                .bind(&fact.request_key)
                .bind(fact.survey_id)
                .bind(fact.engagement_id)
                .bind(fact.user_id)
                .bind(&fact.value)
                .bind(fact.run_cycle_id)
                .bind(fact.created_date)
                .bind(fact.updated_date)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(
            deactivated,
            facts = write.facts.len(),
            "Replaced submission facts"
        );
        Ok(ReplaceOutcome {
            facts_written: write.facts.len(),
            superseded: details > 0,
        })
    }

    #[instrument(skip(self))]
    async fn park_submission(&self, submission_id: i64, source_survey_id: i64) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO etl_pending_submission (submission_id, source_survey_id)
            VALUES ($1, $2)
            ON CONFLICT (submission_id) DO NOTHING
            "#,
        )
        .bind(submission_id)
        .bind(source_survey_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn pending_submissions(&self, limit: i64) -> EtlResult<Vec<PendingSubmission>> {
        let pending = sqlx::query_as::<_, PendingSubmission>(
            r#"
            SELECT submission_id, source_survey_id, attempts, first_seen, last_attempt
            FROM etl_pending_submission
            ORDER BY first_seen, submission_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(pending)
    }

    #[instrument(skip(self))]
    async fn record_pending_attempt(&self, submission_id: i64) -> EtlResult<i32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE etl_pending_submission
            SET attempts = attempts + 1, last_attempt = now()
            WHERE submission_id = $1
            RETURNING attempts
            "#,
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts.unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn release_pending(&self, submission_id: i64) -> EtlResult<()> {
        sqlx::query("DELETE FROM etl_pending_submission WHERE submission_id = $1")
            .bind(submission_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_updated_predicate_excludes_fresh_rows() {
        let filter = ChangeFilter::Updated {
            since: sentinel_watermark(),
            until: Utc::now(),
        };
        assert!(change_predicate(&filter).contains("updated_date <> created_date"));
    }

    #[test]
    fn test_window_bounds_are_naive_utc() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let (lower, upper) = window_bounds(&ChangeFilter::Created { since, until });
        assert_eq!(lower.to_string(), "2024-01-01 10:00:00");
        assert_eq!(upper.to_string(), "2024-01-02 10:00:00");
    }
}
