//! Test helpers for pipeline integration tests
//!
//! - [`TestEnv`]: in-memory source and analytics stores wired to an
//!   orchestrator
//! - Fixture builders (re-exported from [`fixtures`])
//! - Small query helpers over the analytics store

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use survey_etl::config::PipelineConfig;
use survey_etl::models::{
    PackageName, QuestionDefinition, QuestionTable, ResponseFact, RunCycle, SurveySnapshot,
    UserResponseDetail,
};
use survey_etl::pipeline::PipelineOrchestrator;
use survey_etl::store::{MemoryAnalyticsStore, MemorySourceStore, RunCycleStore};

pub use fixtures::*;

/// In-memory stores plus an orchestrator over them
pub struct TestEnv {
    pub source: Arc<MemorySourceStore>,
    pub analytics: Arc<MemoryAnalyticsStore>,
    pub orchestrator: PipelineOrchestrator,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let source = Arc::new(MemorySourceStore::new());
        let analytics = Arc::new(MemoryAnalyticsStore::new());
        let orchestrator = PipelineOrchestrator::new(
            source.clone(),
            analytics.clone(),
            analytics.clone(),
            config,
        );

        Self {
            source,
            analytics,
            orchestrator,
        }
    }

    pub fn add_survey(&self, survey: SurveyFixture) {
        self.source.upsert_survey(survey.build()).unwrap();
    }

    pub fn add_submission(&self, submission: SubmissionFixture) {
        self.source.upsert_submission(submission.build()).unwrap();
    }

    pub fn active_snapshots(&self) -> Vec<SurveySnapshot> {
        self.analytics
            .snapshots()
            .unwrap()
            .into_iter()
            .filter(|s| s.is_active)
            .collect()
    }

    pub fn active_questions(&self, table: QuestionTable) -> Vec<QuestionDefinition> {
        self.analytics
            .question_definitions(table)
            .unwrap()
            .into_iter()
            .filter(|q| q.is_active)
            .collect()
    }

    pub fn active_facts(&self, table: QuestionTable) -> Vec<ResponseFact> {
        self.analytics
            .response_facts(table)
            .unwrap()
            .into_iter()
            .filter(|f| f.is_active)
            .collect()
    }

    pub fn active_details(&self) -> Vec<UserResponseDetail> {
        self.analytics
            .user_response_details()
            .unwrap()
            .into_iter()
            .filter(|d| d.is_active)
            .collect()
    }

    pub fn runs(&self, package: PackageName) -> Vec<RunCycle> {
        self.analytics
            .run_cycles()
            .unwrap()
            .into_iter()
            .filter(|r| r.package_name == package)
            .collect()
    }

    pub async fn watermark(&self, package: PackageName) -> chrono::DateTime<chrono::Utc> {
        self.analytics
            .last_successful_watermark(package)
            .await
            .unwrap()
    }
}

/// Let the wall clock move past the last stamped run-cycle end time
pub async fn advance_clock() {
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
}
