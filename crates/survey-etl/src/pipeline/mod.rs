//! Extract, transform and load stages
//!
//! - [`extract`]: watermark resolution and change queries
//! - [`component`]: `inputType` classification
//! - [`transform`]: answers to fact rows
//! - [`survey_loader`] / [`submission_loader`]: versioned writes
//! - [`orchestrator`]: run-cycle bookkeeping around both phases

pub mod component;
pub mod extract;
pub mod orchestrator;
pub mod stats;
pub mod submission_loader;
pub mod survey_loader;
pub mod transform;

pub use component::{classify, ClassifiedComponent, ComponentKind};
pub use extract::{extract_submissions, extract_surveys, ChangeSet, ExtractWindow};
pub use orchestrator::PipelineOrchestrator;
pub use stats::{LoadStats, PhaseReport, RunReport};
pub use submission_loader::{SubmissionFactLoader, SubmissionOutcome};
pub use survey_loader::{plan_questions, QuestionPlan, SurveySnapshotLoader};
pub use transform::{AnswerTransformer, FactContext};
