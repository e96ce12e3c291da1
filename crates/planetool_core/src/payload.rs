//! Typed work item update payload.
//!
//! Every field is a [`FieldChange`]: `Keep` fields are left out of the
//! request body, `Clear` fields are sent as an explicit empty value, and
//! `Set` fields carry the new value.

use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::error::CoreError;
use crate::workitem::{Priority, WorkItem};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for FieldChange<T> {
    fn default() -> Self {
        Self::Keep
    }
}

impl<T> FieldChange<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            _ => None,
        }
    }

    /// `Some` becomes `Set`, `None` becomes `Keep`.
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Keep, Self::Set)
    }
}

impl<T: Clone> FieldChange<T> {
    fn apply_option(&self, current: &mut Option<T>) {
        match self {
            Self::Keep => {}
            Self::Clear => *current = None,
            Self::Set(value) => *current = Some(value.clone()),
        }
    }
}

/// How a cleared field is written into the request body.
pub trait ClearValue {
    fn serialize_cleared<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_none()
    }
}

impl ClearValue for String {}
impl ClearValue for f64 {}
impl ClearValue for NaiveDate {}

impl ClearValue for Priority {
    fn serialize_cleared<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(Priority::None.as_str())
    }
}

impl<T> ClearValue for Vec<T> {
    fn serialize_cleared<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_seq(Some(0))?.end()
    }
}

impl<T: Serialize + ClearValue> Serialize for FieldChange<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Keep => serializer.serialize_none(),
            Self::Clear => T::serialize_cleared(serializer),
            Self::Set(value) => value.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationPayload {
    #[serde(rename = "name", skip_serializing_if = "FieldChange::is_keep")]
    pub title: FieldChange<String>,
    #[serde(rename = "description_html", skip_serializing_if = "FieldChange::is_keep")]
    pub description: FieldChange<String>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub state: FieldChange<String>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub priority: FieldChange<Priority>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub assignees: FieldChange<Vec<String>>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub labels: FieldChange<Vec<String>>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub start_date: FieldChange<NaiveDate>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub target_date: FieldChange<NaiveDate>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub estimate_point: FieldChange<f64>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub module: FieldChange<String>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub cycle: FieldChange<String>,
    #[serde(skip_serializing_if = "FieldChange::is_keep")]
    pub parent: FieldChange<String>,
}

impl MutationPayload {
    pub fn is_empty(&self) -> bool {
        self.title.is_keep()
            && self.description.is_keep()
            && self.state.is_keep()
            && self.priority.is_keep()
            && self.assignees.is_keep()
            && self.labels.is_keep()
            && self.start_date.is_keep()
            && self.target_date.is_keep()
            && self.estimate_point.is_keep()
            && self.module.is_keep()
            && self.cycle.is_keep()
            && self.parent.is_keep()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match &self.title {
            FieldChange::Clear => return Err(CoreError::validation("title cannot be cleared")),
            FieldChange::Set(title) if title.trim().is_empty() => {
                return Err(CoreError::validation("title cannot be empty"));
            }
            _ => {}
        }
        if let FieldChange::Set(estimate) = self.estimate_point
            && (!estimate.is_finite() || estimate < 0.0)
        {
            return Err(CoreError::validation(format!(
                "estimate must be a non-negative number, got {estimate}"
            )));
        }
        if let (FieldChange::Set(start), FieldChange::Set(target)) =
            (&self.start_date, &self.target_date)
            && start > target
        {
            return Err(CoreError::validation(format!(
                "start date {start} is after target date {target}"
            )));
        }
        Ok(())
    }

    /// JSON request body; untouched fields are omitted.
    pub fn to_request_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// One human-readable line per touched field.
    pub fn preview_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        push_display(&mut lines, "Title", &self.title);
        match &self.description {
            FieldChange::Keep => {}
            FieldChange::Clear => lines.push("Description: (cleared)".to_string()),
            FieldChange::Set(value) => lines.push(format!(
                "Description: [updated - {} chars]",
                value.chars().count()
            )),
        }
        push_display(&mut lines, "State", &self.state);
        push_display(&mut lines, "Priority", &self.priority);
        push_list(&mut lines, "Assignees", &self.assignees);
        push_list(&mut lines, "Labels", &self.labels);
        push_display(&mut lines, "Start date", &self.start_date);
        push_display(&mut lines, "Target date", &self.target_date);
        push_display(&mut lines, "Estimate", &self.estimate_point);
        push_display(&mut lines, "Module", &self.module);
        push_display(&mut lines, "Cycle", &self.cycle);
        push_display(&mut lines, "Parent", &self.parent);
        lines
    }

    /// Apply the payload to a local copy of a work item.
    pub fn apply_to(&self, item: &mut WorkItem) {
        if let FieldChange::Set(title) = &self.title {
            item.name = title.clone();
        }
        self.description.apply_option(&mut item.description_html);
        self.state.apply_option(&mut item.state);
        match self.priority {
            FieldChange::Keep => {}
            FieldChange::Clear => item.priority = Priority::None,
            FieldChange::Set(priority) => item.priority = priority,
        }
        apply_list(&self.assignees, &mut item.assignees);
        apply_list(&self.labels, &mut item.labels);
        self.start_date.apply_option(&mut item.start_date);
        self.target_date.apply_option(&mut item.target_date);
        self.estimate_point.apply_option(&mut item.estimate_point);
        self.module.apply_option(&mut item.module);
        self.cycle.apply_option(&mut item.cycle);
        self.parent.apply_option(&mut item.parent);
    }
}

/// Wrap markdown in the container the remote editor renders as rich text.
pub fn description_to_html(markdown: &str) -> String {
    format!("<div>{}</div>", markdown.trim())
}

/// Read a markdown description from `path` and wrap it like
/// [`description_to_html`].
pub fn description_file_to_html(path: &Path) -> anyhow::Result<String> {
    let markdown = fs::read_to_string(path)
        .with_context(|| format!("failed to read description file {}", path.display()))?;
    Ok(description_to_html(&markdown))
}

fn apply_list(change: &FieldChange<Vec<String>>, current: &mut Vec<String>) {
    match change {
        FieldChange::Keep => {}
        FieldChange::Clear => current.clear(),
        FieldChange::Set(values) => *current = values.clone(),
    }
}

fn push_display<T: std::fmt::Display>(
    lines: &mut Vec<String>,
    label: &str,
    change: &FieldChange<T>,
) {
    match change {
        FieldChange::Keep => {}
        FieldChange::Clear => lines.push(format!("{label}: (cleared)")),
        FieldChange::Set(value) => lines.push(format!("{label}: {value}")),
    }
}

fn push_list(lines: &mut Vec<String>, label: &str, change: &FieldChange<Vec<String>>) {
    match change {
        FieldChange::Keep => {}
        FieldChange::Clear => lines.push(format!("{label}: (cleared)")),
        FieldChange::Set(values) => lines.push(format!("{label}: {}", values.join(", "))),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{FieldChange, MutationPayload, description_file_to_html, description_to_html};
    use crate::workitem::{Priority, WorkItem};

    #[test]
    fn empty_payload_serializes_to_empty_object() {
        let payload = MutationPayload::default();
        assert!(payload.is_empty());
        assert_eq!(payload.to_request_body().expect("serialize"), "{}");
    }

    #[test]
    fn clear_is_distinct_from_keep_in_request_body() {
        let payload = MutationPayload {
            assignees: FieldChange::Clear,
            module: FieldChange::Clear,
            labels: FieldChange::Set(vec!["L1".to_string()]),
            priority: FieldChange::Set(Priority::Urgent),
            ..MutationPayload::default()
        };
        let body: serde_json::Value =
            serde_json::from_str(&payload.to_request_body().expect("serialize")).expect("json");
        assert_eq!(
            body,
            json!({
                "assignees": [],
                "labels": ["L1"],
                "module": null,
                "priority": "urgent",
            })
        );
    }

    #[test]
    fn title_and_description_use_api_field_names() {
        let payload = MutationPayload {
            title: FieldChange::Set("New title".to_string()),
            description: FieldChange::Set(description_to_html(" body ")),
            ..MutationPayload::default()
        };
        let body: serde_json::Value =
            serde_json::from_str(&payload.to_request_body().expect("serialize")).expect("json");
        assert_eq!(
            body,
            json!({"name": "New title", "description_html": "<div>body</div>"})
        );
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cleared_title = MutationPayload {
            title: FieldChange::Clear,
            ..MutationPayload::default()
        };
        assert!(cleared_title.validate().is_err());

        let negative = MutationPayload {
            estimate_point: FieldChange::Set(-1.0),
            ..MutationPayload::default()
        };
        assert!(negative.validate().is_err());

        let inverted = MutationPayload {
            start_date: FieldChange::Set(NaiveDate::from_ymd_opt(2025, 5, 2).expect("date")),
            target_date: FieldChange::Set(NaiveDate::from_ymd_opt(2025, 5, 1).expect("date")),
            ..MutationPayload::default()
        };
        let error = inverted.validate().expect_err("must fail");
        assert!(error.to_string().contains("after target date"));

        assert!(MutationPayload::default().validate().is_ok());
    }

    #[test]
    fn preview_lists_only_touched_fields() {
        let payload = MutationPayload {
            state: FieldChange::Set("In Progress".to_string()),
            labels: FieldChange::Clear,
            assignees: FieldChange::Set(vec!["u1".to_string(), "u2".to_string()]),
            ..MutationPayload::default()
        };
        assert_eq!(
            payload.preview_lines(),
            vec![
                "State: In Progress".to_string(),
                "Assignees: u1, u2".to_string(),
                "Labels: (cleared)".to_string(),
            ]
        );
    }

    #[test]
    fn apply_to_updates_local_copy() {
        let mut item = WorkItem::new("wi-1", "Old");
        item.labels = vec!["L1".to_string()];
        item.module = Some("m-1".to_string());

        let payload = MutationPayload {
            title: FieldChange::Set("New".to_string()),
            labels: FieldChange::Set(vec!["L1".to_string(), "L2".to_string()]),
            module: FieldChange::Clear,
            estimate_point: FieldChange::Set(3.0),
            ..MutationPayload::default()
        };
        payload.apply_to(&mut item);

        assert_eq!(item.name, "New");
        assert_eq!(item.labels, vec!["L1".to_string(), "L2".to_string()]);
        assert_eq!(item.module, None);
        assert_eq!(item.estimate_point, Some(3.0));
    }

    #[test]
    fn description_file_is_wrapped_like_inline_text() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notes.md");
        fs::write(&path, "\n# Rollout\n\nShip behind a flag.\n").expect("write description");

        assert_eq!(
            description_file_to_html(&path).expect("read description"),
            "<div># Rollout\n\nShip behind a flag.</div>"
        );

        let error =
            description_file_to_html(&temp.path().join("missing.md")).expect_err("must fail");
        assert!(error.to_string().contains("failed to read description file"));
    }
}
