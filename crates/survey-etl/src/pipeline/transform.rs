//! Answer normalization
//!
//! Turns one (question component, submitted answer) pair into the fact rows
//! it contributes. Nothing here touches a store.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::component::{ClassifiedComponent, ComponentKind};
use crate::models::{
    scalar_to_string, QuestionTable, ResponseFact, SourceSubmission, SurveySnapshot,
};

/// Per-submission values copied onto every fact
#[derive(Debug, Clone, PartialEq)]
pub struct FactContext {
    pub submission_id: i64,
    /// Analytics snapshot id, not the source survey id
    pub survey_id: i64,
    pub engagement_id: Option<i64>,
    pub user_id: Option<i64>,
    pub run_cycle_id: i64,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

impl FactContext {
    /// Facts keep the submission's own timestamps, not ETL wall-clock time
    pub fn new(
        submission: &SourceSubmission,
        snapshot: &SurveySnapshot,
        run_cycle_id: i64,
    ) -> Self {
        Self {
            submission_id: submission.id,
            survey_id: snapshot.id,
            engagement_id: snapshot.engagement_id,
            user_id: submission.user_id,
            run_cycle_id,
            created_date: submission.created_date,
            updated_date: submission.updated_date,
        }
    }
}

pub struct AnswerTransformer {
    context: FactContext,
}

impl AnswerTransformer {
    pub fn new(context: FactContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &FactContext {
        &self.context
    }

    /// Facts for one answered question
    ///
    /// Radio and checkbox answers produce a typed row carrying the option
    /// label and an option row carrying the raw value. Answers that do not
    /// match a declared option produce nothing.
    pub fn transform(
        &self,
        question: &ClassifiedComponent<'_>,
        answer: &Value,
    ) -> Vec<ResponseFact> {
        let Some(table) = question.table() else {
            return Vec::new();
        };

        match question.kind {
            ComponentKind::Radio => self.radio(question, table, answer),
            ComponentKind::Checkbox => self.checkbox(question, table, answer),
            ComponentKind::Text => vec![self.fact(question, table, text_value(answer))],
            ComponentKind::Unknown => Vec::new(),
        }
    }

    fn radio(
        &self,
        question: &ClassifiedComponent<'_>,
        table: QuestionTable,
        answer: &Value,
    ) -> Vec<ResponseFact> {
        let Some(value) = scalar_to_string(answer) else {
            debug!(
                submission_id = self.context.submission_id,
                key = %question.component.key,
                "Radio answer is not a scalar; dropped"
            );
            return Vec::new();
        };

        match question.component.label_for(&value) {
            Some(label) => self.option_pair(question, table, label, &value),
            None => {
                debug!(
                    submission_id = self.context.submission_id,
                    key = %question.component.key,
                    value = %value,
                    "Radio answer not among declared values; dropped"
                );
                Vec::new()
            }
        }
    }

    fn checkbox(
        &self,
        question: &ClassifiedComponent<'_>,
        table: QuestionTable,
        answer: &Value,
    ) -> Vec<ResponseFact> {
        let selected = |value: &str| match answer {
            Value::Object(map) => map.get(value).is_some_and(is_checked),
            Value::Array(items) => items
                .iter()
                .filter_map(scalar_to_string)
                .any(|item| item == value),
            _ => false,
        };

        question
            .component
            .values
            .iter()
            .filter(|option| selected(&option.value))
            .flat_map(|option| self.option_pair(question, table, &option.label, &option.value))
            .collect()
    }

    fn option_pair(
        &self,
        question: &ClassifiedComponent<'_>,
        table: QuestionTable,
        label: &str,
        value: &str,
    ) -> Vec<ResponseFact> {
        vec![
            self.fact(question, table, label.to_string()),
            self.fact(question, QuestionTable::Option, value.to_string()),
        ]
    }

    fn fact(
        &self,
        question: &ClassifiedComponent<'_>,
        table: QuestionTable,
        value: String,
    ) -> ResponseFact {
        ResponseFact {
            table,
            submission_id: self.context.submission_id,
            request_id: question.component.id.clone(),
            request_key: question.component.key.clone(),
            survey_id: self.context.survey_id,
            engagement_id: self.context.engagement_id,
            user_id: self.context.user_id,
            value,
            is_active: true,
            run_cycle_id: self.context.run_cycle_id,
            created_date: self.context.created_date,
            updated_date: self.context.updated_date,
        }
    }
}

/// A checkbox flag: `true`, or the strings "yes"/"true" in any case
fn is_checked(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

fn text_value(answer: &Value) -> String {
    match answer {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::FormComponent;
    use chrono::TimeZone;
    use serde_json::json;

    fn transformer() -> AnswerTransformer {
        AnswerTransformer::new(FactContext {
            submission_id: 100,
            survey_id: 1,
            engagement_id: Some(3),
            user_id: None,
            run_cycle_id: 9,
            created_date: Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
            updated_date: None,
        })
    }

    fn component(value: Value) -> FormComponent {
        serde_json::from_value(value).unwrap()
    }

    fn typed(facts: &[ResponseFact], table: QuestionTable) -> Vec<&str> {
        facts
            .iter()
            .filter(|f| f.table == table)
            .map(|f| f.value.as_str())
            .collect()
    }

    #[test]
    fn test_radio_resolves_label() {
        let q = component(json!({
            "id": "c1", "key": "q1", "type": "radio", "inputType": "radio",
            "values": [{"value": "y", "label": "Yes"}, {"value": "n", "label": "No"}]
        }));
        let facts = transformer().transform(&ClassifiedComponent::new(&q), &json!("y"));

        assert_eq!(typed(&facts, QuestionTable::Radio), vec!["Yes"]);
        assert_eq!(typed(&facts, QuestionTable::Option), vec!["y"]);
        assert!(facts.iter().all(|f| f.request_key == "q1" && f.request_id == "c1"));
        assert!(facts.iter().all(|f| f.user_id.is_none() && f.is_active));
    }

    #[test]
    fn test_radio_orphan_value_is_dropped() {
        let q = component(json!({
            "id": "c1", "key": "q1", "inputType": "radio",
            "values": [{"value": "y", "label": "Yes"}]
        }));
        let facts = transformer().transform(&ClassifiedComponent::new(&q), &json!("maybe"));
        assert!(facts.is_empty());
    }

    #[test]
    fn test_checkbox_fans_out_truthy_options() {
        let q = component(json!({
            "id": "c2", "key": "parks", "type": "selectboxes", "inputType": "checkbox",
            "values": [
                {"value": "a", "label": "Alpha"},
                {"value": "b", "label": "Bravo"},
                {"value": "c", "label": "Charlie"},
                {"value": "d", "label": "Delta"},
                {"value": "e", "label": "Echo"}
            ]
        }));
        let answer = json!({"a": true, "b": "Yes", "c": "TRUE", "d": false, "e": "no"});
        let facts = transformer().transform(&ClassifiedComponent::new(&q), &answer);

        assert_eq!(
            typed(&facts, QuestionTable::Selectbox),
            vec!["Alpha", "Bravo", "Charlie"]
        );
        assert_eq!(typed(&facts, QuestionTable::Option), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_checkbox_ignores_undeclared_options() {
        let q = component(json!({
            "id": "c2", "key": "parks", "inputType": "checkbox",
            "values": [{"value": "a", "label": "Alpha"}]
        }));
        let facts =
            transformer().transform(&ClassifiedComponent::new(&q), &json!({"zzz": true}));
        assert!(facts.is_empty());
    }

    #[test]
    fn test_text_is_verbatim() {
        let q = component(json!({"id": "c3", "key": "why", "type": "textarea"}));
        let facts = transformer().transform(&ClassifiedComponent::new(&q), &json!("  Because.  "));

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].table, QuestionTable::Textarea);
        assert_eq!(facts[0].value, "  Because.  ");
    }

    #[test]
    fn test_text_non_string_is_serialized() {
        let q = component(json!({"id": "c4", "key": "age", "type": "textfield", "inputType": "text"}));
        let facts = transformer().transform(&ClassifiedComponent::new(&q), &json!(42));
        assert_eq!(facts[0].table, QuestionTable::Textfield);
        assert_eq!(facts[0].value, "42");
    }

    #[test]
    fn test_facts_copy_submission_timestamps() {
        let q = component(json!({"id": "c3", "key": "why", "type": "textfield"}));
        let t = transformer();
        let facts = t.transform(&ClassifiedComponent::new(&q), &json!("x"));
        assert_eq!(facts[0].created_date, t.context().created_date);
        assert_eq!(facts[0].run_cycle_id, 9);
    }

    #[test]
    fn test_unknown_component_yields_nothing() {
        let q = component(json!({"id": "c5", "key": "sig", "inputType": "signature"}));
        let facts = transformer().transform(&ClassifiedComponent::new(&q), &json!("data:image/png"));
        assert!(facts.is_empty());
    }
}
