//! Rows owned by the analytics database
//!
//! Everything here is written exclusively by the pipeline. Rows are never
//! deleted: superseded versions are kept with `is_active = false`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Watermark returned when a package has never completed a run
pub fn sentinel_watermark() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The two pipelines tracked in `etl_runcycle.packagename`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageName {
    Survey,
    Submission,
}

impl PackageName {
    pub const ALL: [PackageName; 2] = [PackageName::Survey, PackageName::Submission];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageName::Survey => "survey",
            PackageName::Submission => "submission",
        }
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for PackageName {
    type Err = crate::error::EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "survey" => Ok(PackageName::Survey),
            "submission" => Ok(PackageName::Submission),
            other => Err(crate::error::EtlError::config(format!(
                "Unknown package name: {}",
                other
            ))),
        }
    }
}

/// One pipeline execution attempt (`etl_runcycle`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCycle {
    pub id: i64,
    pub package_name: PackageName,
    pub start_time: DateTime<Utc>,
    /// Upper edge of the extraction window, stamped when the run begins
    pub end_time: Option<DateTime<Utc>>,
    pub description: String,
    pub success: bool,
}

/// A versioned copy of a survey (`survey` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SurveySnapshot {
    pub id: i64,
    pub source_survey_id: i64,
    pub name: String,
    pub engagement_id: Option<i64>,
    pub is_active: bool,
    pub run_cycle_id: i64,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

/// The per-type tables shared by question definitions and response facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionTable {
    Radio,
    Selectbox,
    Textarea,
    Textfield,
    Option,
}

impl QuestionTable {
    pub const ALL: [QuestionTable; 5] = [
        QuestionTable::Radio,
        QuestionTable::Selectbox,
        QuestionTable::Textarea,
        QuestionTable::Textfield,
        QuestionTable::Option,
    ];

    pub fn request_table(&self) -> &'static str {
        match self {
            QuestionTable::Radio => "request_type_radio",
            QuestionTable::Selectbox => "request_type_selectbox",
            QuestionTable::Textarea => "request_type_textarea",
            QuestionTable::Textfield => "request_type_textfield",
            QuestionTable::Option => "request_type_option",
        }
    }

    pub fn response_table(&self) -> &'static str {
        match self {
            QuestionTable::Radio => "response_type_radio",
            QuestionTable::Selectbox => "response_type_selectbox",
            QuestionTable::Textarea => "response_type_textarea",
            QuestionTable::Textfield => "response_type_textfield",
            QuestionTable::Option => "response_type_option",
        }
    }
}

/// A question definition planned for a snapshot that does not exist yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub table: QuestionTable,
    pub key: String,
    pub component_type: String,
    pub label: Option<String>,
    /// Source component id
    pub request_id: String,
}

/// A persisted `request_type_*` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub id: i64,
    pub table: QuestionTable,
    pub survey_id: i64,
    pub engagement_id: Option<i64>,
    pub key: String,
    pub component_type: String,
    pub label: Option<String>,
    pub request_id: String,
    pub is_active: bool,
    pub run_cycle_id: i64,
}

/// Everything needed to supersede a survey's active snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotWrite {
    pub source_survey_id: i64,
    pub name: String,
    pub engagement_id: Option<i64>,
    pub run_cycle_id: i64,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionDraft>,
}

/// A normalized answer (`response_type_*` row, before an id is assigned)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFact {
    pub table: QuestionTable,
    pub submission_id: i64,
    /// Source component id
    pub request_id: String,
    pub request_key: String,
    pub survey_id: i64,
    pub engagement_id: Option<i64>,
    pub user_id: Option<i64>,
    pub value: String,
    pub is_active: bool,
    pub run_cycle_id: i64,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

/// Per-submission link between a snapshot, its engagement and the respondent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponseDetail {
    pub submission_id: i64,
    pub survey_id: i64,
    pub engagement_id: Option<i64>,
    pub user_id: Option<i64>,
    pub is_active: bool,
    pub run_cycle_id: i64,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

/// All rows derived from one submission, replaced as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionWrite {
    pub submission_id: i64,
    pub detail: UserResponseDetail,
    pub facts: Vec<ResponseFact>,
}

/// A submission parked until its survey has an active snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingSubmission {
    pub submission_id: i64,
    pub source_survey_id: i64,
    pub attempts: i32,
    pub first_seen: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_package_name_round_trip() {
        for package in PackageName::ALL {
            assert_eq!(package.as_str().parse::<PackageName>().unwrap(), package);
        }
        assert_eq!("SURVEY".parse::<PackageName>().unwrap(), PackageName::Survey);
        assert!("widgets".parse::<PackageName>().is_err());
    }

    #[test]
    fn test_table_names_are_paired() {
        for table in QuestionTable::ALL {
            let request = table.request_table().trim_start_matches("request_type_");
            let response = table.response_table().trim_start_matches("response_type_");
            assert_eq!(request, response);
        }
    }

    #[test]
    fn test_sentinel_watermark_is_1900() {
        assert_eq!(sentinel_watermark().to_rfc3339(), "1900-01-01T00:00:00+00:00");
    }
}
