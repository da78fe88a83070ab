//! Rows read from the OLTP source
//!
//! Surveys carry their questions as an opaque form-builder document and
//! submissions carry answers as an opaque key/answer object. These types pull
//! out just enough structure for the transformer to work with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{EtlError, EtlResult};

/// A survey as stored by the engagement application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceSurvey {
    pub id: i64,
    pub name: String,
    pub engagement_id: Option<i64>,
    pub form_json: Value,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

impl SourceSurvey {
    /// Parse the form document into its component tree
    pub fn form_schema(&self) -> EtlResult<FormSchema> {
        FormSchema::from_form_json(self.id, &self.form_json)
    }
}

/// A respondent's submission against a survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceSubmission {
    pub id: i64,
    pub survey_id: i64,
    pub user_id: Option<i64>,
    pub submission_json: Value,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

impl SourceSubmission {
    /// The component-key to answer map
    pub fn answers(&self) -> EtlResult<&Map<String, Value>> {
        self.submission_json
            .as_object()
            .ok_or_else(|| EtlError::invalid_payload(self.id, "submission_json is not an object"))
    }

    /// The answer for `key` if one was actually given
    ///
    /// Null, empty strings, empty arrays and empty objects count as unanswered.
    pub fn answer_for(&self, key: &str) -> EtlResult<Option<&Value>> {
        Ok(self.answers()?.get(key).filter(|v| is_present(v)))
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// The parsed `form_json` of a survey
#[derive(Debug, Clone, PartialEq)]
pub struct FormSchema {
    pub components: Vec<FormComponent>,
}

impl FormSchema {
    pub fn from_form_json(survey_id: i64, form_json: &Value) -> EtlResult<Self> {
        let components = form_json
            .get("components")
            .ok_or_else(|| EtlError::missing_schema(survey_id, "form_json has no components"))?;

        let components: Vec<FormComponent> = serde_json::from_value(components.clone())
            .map_err(|e| EtlError::missing_schema(survey_id, e.to_string()))?;

        Ok(Self { components })
    }

    /// Leaf question components in document order
    ///
    /// Layout containers (panels, wizard pages, column sets) are walked
    /// through rather than returned.
    pub fn questions(&self) -> Vec<&FormComponent> {
        let mut out = Vec::new();
        let mut stack: Vec<&FormComponent> = self.components.iter().rev().collect();

        while let Some(component) = stack.pop() {
            if component.is_container() {
                let nested = component
                    .components
                    .iter()
                    .chain(component.columns.iter().flat_map(|c| c.components.iter()));
                let nested: Vec<_> = nested.collect();
                stack.extend(nested.into_iter().rev());
            } else if !component.key.is_empty() {
                out.push(component);
            }
        }

        out
    }
}

/// One node of the form-builder document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormComponent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub component_type: String,
    #[serde(rename = "inputType", default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub values: Vec<OptionValue>,
    #[serde(default)]
    pub components: Vec<FormComponent>,
    #[serde(default)]
    pub columns: Vec<LayoutColumn>,
}

impl FormComponent {
    /// `inputType`, falling back to `type` when the builder omitted it
    pub fn effective_input_type(&self) -> &str {
        match self.input_type.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => &self.component_type,
        }
    }

    pub fn is_container(&self) -> bool {
        !self.components.is_empty() || !self.columns.is_empty()
    }

    /// Display label for a declared option value
    pub fn label_for(&self, value: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|option| option.value == value)
            .map(|option| option.label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutColumn {
    #[serde(default)]
    pub components: Vec<FormComponent>,
}

/// A declared `{value, label}` choice on a radio or checkbox component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValue {
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default)]
    pub label: String,
}

/// Render a JSON scalar the way option values are compared
///
/// Builders emit option values as strings but numbers and booleans show up
/// in older documents.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom("option value must be a string, number or bool"))
}
