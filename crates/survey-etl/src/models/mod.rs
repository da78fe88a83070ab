//! Data models
//!
//! - **source**: read-only surveys and submissions from the engagement database
//! - **analytics**: snapshots, question definitions, facts and bookkeeping rows

pub mod analytics;
pub mod source;

pub use analytics::{
    sentinel_watermark, PackageName, PendingSubmission, QuestionDefinition, QuestionDraft,
    QuestionTable, ResponseFact, RunCycle, SnapshotWrite, SubmissionWrite, SurveySnapshot,
    UserResponseDetail,
};
pub use source::{
    scalar_to_string, FormComponent, FormSchema, LayoutColumn, OptionValue, SourceSubmission,
    SourceSurvey,
};
