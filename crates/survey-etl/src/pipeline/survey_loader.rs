//! Survey snapshot loading
//!
//! A changed survey is re-snapshotted as a whole document: the active
//! snapshot and its question definitions are deactivated and a fresh set is
//! inserted. History is kept through `is_active = false`.

use tracing::{debug, info, warn};

use super::component::ClassifiedComponent;
use super::stats::LoadStats;
use crate::error::EtlResult;
use crate::models::{FormSchema, QuestionDraft, QuestionTable, SnapshotWrite, SourceSurvey};
use crate::store::AnalyticsStore;

/// Question-definition rows planned for one form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionPlan {
    pub drafts: Vec<QuestionDraft>,
    /// `(key, inputType)` of components with no analytics representation
    pub unknown: Vec<(String, String)>,
}

/// Plan the definitions for every question in `schema`
///
/// Radio and checkbox questions also get one option row per declared value,
/// keyed by that value.
pub fn plan_questions(schema: &FormSchema) -> QuestionPlan {
    let mut plan = QuestionPlan::default();

    for component in schema.questions() {
        let classified = ClassifiedComponent::new(component);
        let Some(table) = classified.table() else {
            plan.unknown.push((
                component.key.clone(),
                component.effective_input_type().to_string(),
            ));
            continue;
        };

        let component_type = if component.component_type.is_empty() {
            component.effective_input_type().to_string()
        } else {
            component.component_type.clone()
        };

        plan.drafts.push(QuestionDraft {
            table,
            key: component.key.clone(),
            component_type: component_type.clone(),
            label: component.label.clone(),
            request_id: component.id.clone(),
        });

        if classified.has_options() {
            plan.drafts
                .extend(component.values.iter().map(|option| QuestionDraft {
                    table: QuestionTable::Option,
                    key: option.value.clone(),
                    component_type: component_type.clone(),
                    label: Some(option.label.clone()),
                    request_id: component.id.clone(),
                }));
        }
    }

    plan
}

pub struct SurveySnapshotLoader<'a> {
    analytics: &'a dyn AnalyticsStore,
}

impl<'a> SurveySnapshotLoader<'a> {
    pub fn new(analytics: &'a dyn AnalyticsStore) -> Self {
        Self { analytics }
    }

    /// Snapshot each survey in turn
    ///
    /// Surveys whose form cannot be parsed are logged and skipped; any other
    /// error stops the batch.
    pub async fn load(
        &self,
        surveys: Vec<SourceSurvey>,
        run_cycle_id: i64,
    ) -> EtlResult<LoadStats> {
        let mut stats = LoadStats::new();

        for survey in surveys {
            let survey_id = survey.id;
            match self.load_one(survey, run_cycle_id, &mut stats).await {
                Ok(()) => {}
                Err(e) if e.is_unit_recoverable() => {
                    warn!(source_survey_id = survey_id, error = %e, "Skipping survey");
                    stats.inc_failed();
                }
                Err(e) => return Err(e),
            }
        }

        stats.complete();
        info!(
            run_cycle_id,
            inserted = stats.units_inserted,
            replaced = stats.units_replaced,
            failed = stats.units_failed,
            definitions = stats.rows_written,
            unknown_components = stats.unknown_components,
            duration_secs = stats.duration_secs,
            "Survey snapshots loaded"
        );
        Ok(stats)
    }

    async fn load_one(
        &self,
        survey: SourceSurvey,
        run_cycle_id: i64,
        stats: &mut LoadStats,
    ) -> EtlResult<()> {
        let schema = survey.form_schema()?;
        let plan = plan_questions(&schema);

        for (key, input_type) in &plan.unknown {
            warn!(
                source_survey_id = survey.id,
                key = %key,
                input_type = %input_type,
                "Unrecognized component type; skipped"
            );
        }

        let previous = self.analytics.active_snapshot(survey.id).await?;
        let definitions = plan.drafts.len();

        let snapshot = self
            .analytics
            .replace_survey_snapshot(SnapshotWrite {
                source_survey_id: survey.id,
                name: survey.name,
                engagement_id: survey.engagement_id,
                run_cycle_id,
                created_date: survey.created_date,
                updated_date: survey.updated_date,
                questions: plan.drafts,
            })
            .await?;

        debug!(
            source_survey_id = snapshot.source_survey_id,
            snapshot_id = snapshot.id,
            previous_snapshot_id = previous.as_ref().map(|p| p.id),
            definitions,
            "Survey snapshotted"
        );

        stats.inc_written(previous.is_some());
        stats.add_rows(definitions);
        stats.unknown_components += plan.unknown.len() as i64;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_covers_every_table() {
        let schema = FormSchema::from_form_json(
            7,
            &json!({"components": [
                {"id": "c1", "key": "q1", "type": "radio", "inputType": "radio",
                 "values": [{"value": "y", "label": "Yes"}, {"value": "n", "label": "No"}]},
                {"id": "c2", "key": "q2", "type": "selectboxes", "inputType": "checkbox",
                 "values": [{"value": "a", "label": "A"}]},
                {"id": "c3", "key": "q3", "type": "textarea"},
                {"id": "c4", "key": "q4", "type": "textfield", "inputType": "text"},
                {"id": "c5", "key": "q5", "type": "signature", "inputType": "signature"}
            ]}),
        )
        .unwrap();

        let plan = plan_questions(&schema);
        let tables: Vec<_> = plan.drafts.iter().map(|d| (d.table, d.key.as_str())).collect();

        assert_eq!(
            tables,
            vec![
                (QuestionTable::Radio, "q1"),
                (QuestionTable::Option, "y"),
                (QuestionTable::Option, "n"),
                (QuestionTable::Selectbox, "q2"),
                (QuestionTable::Option, "a"),
                (QuestionTable::Textarea, "q3"),
                (QuestionTable::Textfield, "q4"),
            ]
        );
        assert_eq!(
            plan.unknown,
            vec![("q5".to_string(), "signature".to_string())]
        );
    }

    #[test]
    fn test_option_rows_point_at_their_component() {
        let schema = FormSchema::from_form_json(
            7,
            &json!({"components": [
                {"id": "c1", "key": "q1", "inputType": "radio",
                 "values": [{"value": "y", "label": "Yes"}]}
            ]}),
        )
        .unwrap();

        let plan = plan_questions(&schema);
        let option = plan
            .drafts
            .iter()
            .find(|d| d.table == QuestionTable::Option)
            .unwrap();
        assert_eq!(option.request_id, "c1");
        assert_eq!(option.label.as_deref(), Some("Yes"));
        assert_eq!(option.component_type, "radio");
    }
}
