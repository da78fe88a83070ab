//! Component classification
//!
//! The form builder tags every component with a free-form `inputType`
//! string. It is resolved once into a [`ComponentKind`] and everything
//! downstream matches on that.

use serde::{Deserialize, Serialize};

use crate::models::{FormComponent, QuestionTable};

/// How a question component is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Single choice; the answer is one option value
    Radio,
    /// Multiple choice; the answer maps option values to a checked flag
    Checkbox,
    /// Free text, stored verbatim
    Text,
    /// No analytics representation yet
    Unknown,
}

/// Classify an `inputType` string, case-insensitively
pub fn classify(input_type: &str) -> ComponentKind {
    match input_type.trim().to_lowercase().as_str() {
        "radio" => ComponentKind::Radio,
        "checkbox" | "selectboxes" => ComponentKind::Checkbox,
        "text" | "textarea" | "textfield" => ComponentKind::Text,
        _ => ComponentKind::Unknown,
    }
}

/// A component together with its resolved kind
#[derive(Debug, Clone, Copy)]
pub struct ClassifiedComponent<'a> {
    pub component: &'a FormComponent,
    pub kind: ComponentKind,
}

impl<'a> ClassifiedComponent<'a> {
    pub fn new(component: &'a FormComponent) -> Self {
        Self {
            component,
            kind: classify(component.effective_input_type()),
        }
    }

    /// The typed table pair the component's definitions and facts land in
    ///
    /// Text questions split on the builder `type`: multi-line inputs go to
    /// the textarea tables, everything else to textfield.
    pub fn table(&self) -> Option<QuestionTable> {
        match self.kind {
            ComponentKind::Radio => Some(QuestionTable::Radio),
            ComponentKind::Checkbox => Some(QuestionTable::Selectbox),
            ComponentKind::Text if is_textarea(&self.component.component_type) => {
                Some(QuestionTable::Textarea)
            }
            ComponentKind::Text => Some(QuestionTable::Textfield),
            ComponentKind::Unknown => None,
        }
    }

    /// Whether answers also get a denormalized option row
    pub fn has_options(&self) -> bool {
        matches!(self.kind, ComponentKind::Radio | ComponentKind::Checkbox)
    }
}

fn is_textarea(component_type: &str) -> bool {
    component_type.trim().eq_ignore_ascii_case("textarea")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(classify("Radio"), ComponentKind::Radio);
        assert_eq!(classify("CHECKBOX"), ComponentKind::Checkbox);
        assert_eq!(classify("selectboxes"), ComponentKind::Checkbox);
        assert_eq!(classify(" textarea "), ComponentKind::Text);
        assert_eq!(classify("text"), ComponentKind::Text);
    }

    #[test]
    fn test_unrecognized_types_are_unknown() {
        assert_eq!(classify("signature"), ComponentKind::Unknown);
        assert_eq!(classify(""), ComponentKind::Unknown);
        assert_eq!(classify("button"), ComponentKind::Unknown);
    }

    #[test]
    fn test_text_table_split() {
        let area = FormComponent {
            key: "comments".to_string(),
            component_type: "textarea".to_string(),
            input_type: Some("text".to_string()),
            ..FormComponent::default()
        };
        let field = FormComponent {
            key: "name".to_string(),
            component_type: "textfield".to_string(),
            input_type: Some("text".to_string()),
            ..FormComponent::default()
        };

        assert_eq!(
            ClassifiedComponent::new(&area).table(),
            Some(QuestionTable::Textarea)
        );
        assert_eq!(
            ClassifiedComponent::new(&field).table(),
            Some(QuestionTable::Textfield)
        );
    }

    #[test]
    fn test_unknown_has_no_table() {
        let signature = FormComponent {
            key: "sig".to_string(),
            component_type: "signature".to_string(),
            input_type: Some("signature".to_string()),
            ..FormComponent::default()
        };
        let classified = ClassifiedComponent::new(&signature);
        assert_eq!(classified.table(), None);
        assert!(!classified.has_options());
    }
}
