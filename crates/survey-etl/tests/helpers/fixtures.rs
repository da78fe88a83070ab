//! Test fixtures and data builders for pipeline tests
//!
//! Builders for source surveys and submissions plus a few canned form
//! components, so tests only spell out what they care about.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use survey_etl::models::{SourceSubmission, SourceSurvey};

/// A timestamp comfortably inside the first extraction window
pub fn an_hour_ago() -> DateTime<Utc> {
    Utc::now() - Duration::hours(1)
}

// ============================================================================
// Form Components
// ============================================================================

pub fn radio(id: &str, key: &str, options: &[(&str, &str)]) -> Value {
    json!({
        "id": id,
        "key": key,
        "label": format!("Question {}", key),
        "type": "radio",
        "inputType": "radio",
        "values": option_values(options),
    })
}

pub fn checkbox(id: &str, key: &str, options: &[(&str, &str)]) -> Value {
    json!({
        "id": id,
        "key": key,
        "label": format!("Question {}", key),
        "type": "selectboxes",
        "inputType": "checkbox",
        "values": option_values(options),
    })
}

pub fn textarea(id: &str, key: &str) -> Value {
    json!({"id": id, "key": key, "label": "Comments", "type": "textarea", "inputType": "text"})
}

pub fn textfield(id: &str, key: &str) -> Value {
    json!({"id": id, "key": key, "label": "Name", "type": "textfield", "inputType": "text"})
}

pub fn signature(id: &str, key: &str) -> Value {
    json!({"id": id, "key": key, "label": "Sign here", "type": "signature", "inputType": "signature"})
}

/// A wizard page wrapping `components`
pub fn panel(key: &str, components: Vec<Value>) -> Value {
    json!({"key": key, "type": "panel", "components": components})
}

fn option_values(options: &[(&str, &str)]) -> Value {
    Value::Array(
        options
            .iter()
            .map(|(value, label)| json!({"value": value, "label": label}))
            .collect(),
    )
}

// ============================================================================
// Survey Fixtures
// ============================================================================

/// Builder for source surveys
#[derive(Debug, Clone)]
pub struct SurveyFixture {
    id: i64,
    name: String,
    engagement_id: Option<i64>,
    components: Vec<Value>,
    form_json: Option<Value>,
    created_date: DateTime<Utc>,
    updated_date: Option<DateTime<Utc>>,
}

impl SurveyFixture {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            name: format!("Survey {}", id),
            engagement_id: Some(1),
            components: Vec::new(),
            form_json: None,
            created_date: an_hour_ago(),
            updated_date: None,
        }
    }

    pub fn with_engagement(mut self, engagement_id: Option<i64>) -> Self {
        self.engagement_id = engagement_id;
        self
    }

    pub fn with_component(mut self, component: Value) -> Self {
        self.components.push(component);
        self
    }

    /// Use `form_json` verbatim instead of building it from components
    pub fn with_form_json(mut self, form_json: Value) -> Self {
        self.form_json = Some(form_json);
        self
    }

    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created_date = created;
        self
    }

    pub fn updated_at(mut self, updated: DateTime<Utc>) -> Self {
        self.updated_date = Some(updated);
        self
    }

    pub fn build(self) -> SourceSurvey {
        SourceSurvey {
            id: self.id,
            name: self.name,
            engagement_id: self.engagement_id,
            form_json: self
                .form_json
                .unwrap_or_else(|| json!({"display": "form", "components": self.components})),
            created_date: self.created_date,
            updated_date: self.updated_date,
        }
    }
}

// ============================================================================
// Submission Fixtures
// ============================================================================

/// Builder for source submissions
#[derive(Debug, Clone)]
pub struct SubmissionFixture {
    id: i64,
    survey_id: i64,
    user_id: Option<i64>,
    answers: Map<String, Value>,
    payload: Option<Value>,
    created_date: DateTime<Utc>,
    updated_date: Option<DateTime<Utc>>,
}

impl SubmissionFixture {
    pub fn new(id: i64, survey_id: i64) -> Self {
        Self {
            id,
            survey_id,
            user_id: None,
            answers: Map::new(),
            payload: None,
            created_date: an_hour_ago(),
            updated_date: None,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn answer(mut self, key: &str, value: Value) -> Self {
        self.answers.insert(key.to_string(), value);
        self
    }

    /// Use `payload` verbatim as `submission_json`
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created_date = created;
        self
    }

    pub fn updated_at(mut self, updated: DateTime<Utc>) -> Self {
        self.updated_date = Some(updated);
        self
    }

    pub fn build(self) -> SourceSubmission {
        SourceSubmission {
            id: self.id,
            survey_id: self.survey_id,
            user_id: self.user_id,
            submission_json: self.payload.unwrap_or(Value::Object(self.answers)),
            created_date: self.created_date,
            updated_date: self.updated_date,
        }
    }
}

// ============================================================================
// Canned Scenario
// ============================================================================

/// Survey 7 with a single yes/no radio question `q1`
pub fn yes_no_survey() -> SurveyFixture {
    SurveyFixture::new(7).with_component(json!({
        "id": "c1",
        "key": "q1",
        "inputType": "radio",
        "values": [{"value": "y", "label": "Yes"}, {"value": "n", "label": "No"}]
    }))
}

/// Submission 100 answering "y" to survey 7
pub fn yes_submission() -> SubmissionFixture {
    SubmissionFixture::new(100, 7).answer("q1", json!("y"))
}
