//! Apply one payload to many work items.
//!
//! A [`BatchPlan`] is built once, then either previewed with
//! [`BatchPlan::dry_run`] or executed with [`BatchPlan::apply`]. Both walk the
//! targets in the same order and use the same payload, so the preview is a
//! faithful predictor of the live run. Failures are recorded per target and
//! never abort the batch.

use std::collections::HashSet;

use serde::Serialize;

use crate::api::WorkItemWriteApi;
use crate::error::CoreError;
use crate::payload::MutationPayload;
use crate::workitem::WorkItem;

const LABEL_TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Built,
    DryRun,
    Applying,
    Done,
}

impl BatchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::DryRun => "dry_run",
            Self::Applying => "applying",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchPlan {
    targets: Vec<WorkItem>,
    payload: MutationPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewLine {
    pub target_id: String,
    pub label: String,
    /// Fields whose value differs from the target's current snapshot.
    pub changed_fields: Vec<&'static str>,
}

impl PreviewLine {
    pub fn render(&self) -> String {
        if self.changed_fields.is_empty() {
            format!("{} (no effective change)", self.label)
        } else {
            format!("{} -> {}", self.label, self.changed_fields.join(", "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunReport {
    pub request_body: String,
    pub changes: Vec<String>,
    pub lines: Vec<PreviewLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub target_id: String,
    pub label: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub success_count: usize,
    pub failure_count: usize,
    pub outcomes: Vec<BatchOutcome>,
    pub request_count: usize,
}

impl BatchSummary {
    fn from_outcomes(outcomes: Vec<BatchOutcome>, request_count: usize) -> Self {
        let success_count = outcomes.iter().filter(|outcome| outcome.succeeded).count();
        Self {
            failure_count: outcomes.len() - success_count,
            success_count,
            outcomes,
            request_count,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }

    /// Ids to feed into a follow-up batch; failures are never retried here.
    pub fn failed_target_ids(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.succeeded)
            .map(|outcome| outcome.target_id.clone())
            .collect()
    }

    pub fn remote_errors(&self) -> Vec<CoreError> {
        self.outcomes
            .iter()
            .filter_map(|outcome| {
                outcome.error.as_ref().map(|message| CoreError::Remote {
                    target_id: outcome.target_id.clone(),
                    message: message.clone(),
                })
            })
            .collect()
    }

    /// Escalate any failed target into [`CoreError::PartialBatchFailure`].
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CoreError::PartialBatchFailure {
                failed: self.failure_count,
                total: self.total(),
            })
        }
    }
}

impl BatchPlan {
    pub fn new(targets: Vec<WorkItem>, payload: MutationPayload) -> Result<Self, CoreError> {
        if targets.is_empty() {
            return Err(CoreError::validation("no work items selected"));
        }
        if payload.is_empty() {
            return Err(CoreError::validation("no updates specified"));
        }
        payload.validate()?;

        let mut seen = HashSet::new();
        let targets: Vec<WorkItem> = targets
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect();
        tracing::debug!(
            phase = BatchPhase::Built.as_str(),
            targets = targets.len(),
            "batch planned"
        );
        Ok(Self { targets, payload })
    }

    pub fn targets(&self) -> &[WorkItem] {
        &self.targets
    }

    pub fn payload(&self) -> &MutationPayload {
        &self.payload
    }

    /// Narrow the plan to the given ids, keeping plan order.
    pub fn retain_targets(mut self, ids: &[String]) -> Result<Self, CoreError> {
        let keep: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.targets.retain(|item| keep.contains(item.id.as_str()));
        if self.targets.is_empty() {
            return Err(CoreError::validation("no work items selected"));
        }
        Ok(self)
    }

    /// Preview every target without any remote call.
    pub fn dry_run(&self) -> serde_json::Result<DryRunReport> {
        tracing::info!(
            phase = BatchPhase::DryRun.as_str(),
            targets = self.targets.len(),
            "previewing batch"
        );
        let lines = self
            .targets
            .iter()
            .map(|item| PreviewLine {
                target_id: item.id.clone(),
                label: item.label(LABEL_TITLE_CHARS),
                changed_fields: changed_fields(item, &self.payload),
            })
            .collect();
        Ok(DryRunReport {
            request_body: self.payload.to_request_body()?,
            changes: self.payload.preview_lines(),
            lines,
        })
    }

    /// Send the payload to every target in order and collect the outcomes.
    pub fn apply<A: WorkItemWriteApi>(self, api: &mut A) -> BatchSummary {
        let span = tracing::info_span!("batch_apply", targets = self.targets.len());
        let _guard = span.enter();
        tracing::info!(phase = BatchPhase::Applying.as_str(), "applying batch");

        let mut outcomes = Vec::with_capacity(self.targets.len());
        for item in &self.targets {
            let label = item.label(LABEL_TITLE_CHARS);
            match api.update_work_item(&item.id, &self.payload) {
                Ok(_) => outcomes.push(BatchOutcome {
                    target_id: item.id.clone(),
                    label,
                    succeeded: true,
                    error: None,
                }),
                Err(error) => {
                    let message = format!("{error:#}");
                    tracing::warn!(
                        target_id = %item.id,
                        error = %message,
                        "work item update failed"
                    );
                    outcomes.push(BatchOutcome {
                        target_id: item.id.clone(),
                        label,
                        succeeded: false,
                        error: Some(message),
                    });
                }
            }
        }

        let summary = BatchSummary::from_outcomes(outcomes, api.request_count());
        tracing::info!(
            phase = BatchPhase::Done.as_str(),
            success = summary.success_count,
            failed = summary.failure_count,
            "batch finished"
        );
        summary
    }
}

fn changed_fields(item: &WorkItem, payload: &MutationPayload) -> Vec<&'static str> {
    let mut after = item.clone();
    payload.apply_to(&mut after);

    let mut fields = Vec::new();
    if after.name != item.name {
        fields.push("title");
    }
    if after.description_html != item.description_html {
        fields.push("description");
    }
    if after.state != item.state {
        fields.push("state");
    }
    if after.priority != item.priority {
        fields.push("priority");
    }
    if after.assignees != item.assignees {
        fields.push("assignees");
    }
    if after.labels != item.labels {
        fields.push("labels");
    }
    if after.start_date != item.start_date {
        fields.push("start_date");
    }
    if after.target_date != item.target_date {
        fields.push("target_date");
    }
    if after.estimate_point != item.estimate_point {
        fields.push("estimate_point");
    }
    if after.module != item.module {
        fields.push("module");
    }
    if after.cycle != item.cycle {
        fields.push("cycle");
    }
    if after.parent != item.parent {
        fields.push("parent");
    }
    fields
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use anyhow::{Result, bail};

    use super::{BatchPlan, BatchSummary};
    use crate::api::{WorkItemReadApi, WorkItemWriteApi};
    use crate::error::CoreError;
    use crate::merge::{MergeMode, MergeRequest};
    use crate::payload::{FieldChange, MutationPayload};
    use crate::workitem::WorkItem;

    #[derive(Default)]
    struct MockApi {
        failing: BTreeSet<String>,
        updated: Vec<String>,
        bodies: Vec<String>,
        request_count: usize,
    }

    impl WorkItemReadApi for MockApi {
        fn list_work_items(&mut self) -> Result<Vec<WorkItem>> {
            self.request_count += 1;
            Ok(Vec::new())
        }

        fn get_work_item(&mut self, work_item_id: &str) -> Result<WorkItem> {
            self.request_count += 1;
            bail!("work item not found: {work_item_id}")
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl WorkItemWriteApi for MockApi {
        fn update_work_item(
            &mut self,
            work_item_id: &str,
            payload: &MutationPayload,
        ) -> Result<WorkItem> {
            self.request_count += 1;
            if self.failing.contains(work_item_id) {
                bail!("HTTP 400: invalid state transition");
            }
            self.updated.push(work_item_id.to_string());
            self.bodies.push(payload.to_request_body()?);
            Ok(WorkItem::new(work_item_id, "updated"))
        }
    }

    fn item(id: &str, sequence_id: u64, labels: &[&str]) -> WorkItem {
        let mut item = WorkItem::new(id, format!("Work item {sequence_id}"));
        item.sequence_id = sequence_id;
        item.labels = labels.iter().map(|label| label.to_string()).collect();
        item
    }

    fn state_payload() -> MutationPayload {
        MutationPayload {
            state: FieldChange::Set("In Progress".to_string()),
            ..MutationPayload::default()
        }
    }

    #[test]
    fn partial_failure_does_not_abort_batch() {
        let mut api = MockApi {
            failing: BTreeSet::from(["wi-2".to_string()]),
            ..MockApi::default()
        };
        let plan = BatchPlan::new(
            vec![item("wi-1", 1, &[]), item("wi-2", 2, &[]), item("wi-3", 3, &[])],
            state_payload(),
        )
        .expect("plan");

        let summary = plan.apply(&mut api);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 1);
        assert_eq!(api.updated, vec!["wi-1".to_string(), "wi-3".to_string()]);

        let ids: Vec<&str> = summary
            .outcomes
            .iter()
            .map(|outcome| outcome.target_id.as_str())
            .collect();
        assert_eq!(ids, vec!["wi-1", "wi-2", "wi-3"]);
        assert_eq!(
            summary.outcomes[1].error.as_deref(),
            Some("HTTP 400: invalid state transition")
        );
        assert_eq!(summary.failed_target_ids(), vec!["wi-2".to_string()]);
        assert_eq!(
            summary.remote_errors(),
            vec![CoreError::Remote {
                target_id: "wi-2".to_string(),
                message: "HTTP 400: invalid state transition".to_string(),
            }]
        );
    }

    #[test]
    fn into_result_escalates_failures() {
        let mut api = MockApi {
            failing: BTreeSet::from(["wi-1".to_string()]),
            ..MockApi::default()
        };
        let summary = BatchPlan::new(vec![item("wi-1", 1, &[])], state_payload())
            .expect("plan")
            .apply(&mut api);
        assert_eq!(
            summary.into_result().expect_err("must fail"),
            CoreError::PartialBatchFailure {
                failed: 1,
                total: 1
            }
        );
    }

    #[test]
    fn dry_run_previews_every_target_without_remote_calls() {
        let api = MockApi::default();
        let plan = BatchPlan::new(
            vec![item("wi-1", 1, &[]), item("wi-2", 2, &[]), item("wi-3", 3, &[])],
            state_payload(),
        )
        .expect("plan");

        let report = plan.dry_run().expect("dry run");
        assert_eq!(report.lines.len(), 3);
        let ids: Vec<&str> = report
            .lines
            .iter()
            .map(|line| line.target_id.as_str())
            .collect();
        assert_eq!(ids, vec!["wi-1", "wi-2", "wi-3"]);
        assert_eq!(report.lines[0].render(), "[1] Work item 1 -> state");
        assert_eq!(report.changes, vec!["State: In Progress".to_string()]);
        assert_eq!(api.request_count, 0);
    }

    #[test]
    fn dry_run_predicts_live_request_bodies() {
        let targets = vec![item("wi-1", 1, &["L1"]), item("wi-2", 2, &["L3"])];
        let merged = targets
            .iter()
            .fold(
                MergeRequest::new(MergeMode::Add, vec!["L2".to_string()]),
                |request, target| request.with_target(target.id.clone(), target.labels.clone()),
            )
            .resolve();
        let payload = MutationPayload {
            labels: merged.change,
            ..MutationPayload::default()
        };
        let plan = BatchPlan::new(targets, payload).expect("plan");

        let report = plan.dry_run().expect("dry run");
        let mut api = MockApi::default();
        let summary = plan.apply(&mut api);

        assert!(summary.is_success());
        assert_eq!(api.bodies.len(), 2);
        assert!(api.bodies.iter().all(|body| *body == report.request_body));
        assert_eq!(report.request_body, r#"{"labels":["L1","L3","L2"]}"#);
    }

    #[test]
    fn preview_flags_targets_without_effective_change() {
        let mut already = item("wi-1", 1, &[]);
        already.state = Some("In Progress".to_string());
        let plan = BatchPlan::new(vec![already, item("wi-2", 2, &[])], state_payload())
            .expect("plan");
        let report = plan.dry_run().expect("dry run");
        assert!(report.lines[0].changed_fields.is_empty());
        assert!(report.lines[0].render().ends_with("(no effective change)"));
        assert_eq!(report.lines[1].changed_fields, vec!["state"]);
    }

    #[test]
    fn plan_rejects_empty_batches_and_payloads() {
        assert!(BatchPlan::new(Vec::new(), state_payload()).is_err());
        assert!(BatchPlan::new(vec![item("wi-1", 1, &[])], MutationPayload::default()).is_err());
    }

    #[test]
    fn duplicate_targets_are_applied_once() {
        let plan = BatchPlan::new(
            vec![item("wi-1", 1, &[]), item("wi-1", 1, &[])],
            state_payload(),
        )
        .expect("plan");
        assert_eq!(plan.targets().len(), 1);
    }

    #[test]
    fn failed_targets_can_be_rerun_as_new_batch() {
        let targets = vec![item("wi-1", 1, &[]), item("wi-2", 2, &[])];
        let mut api = MockApi {
            failing: BTreeSet::from(["wi-2".to_string()]),
            ..MockApi::default()
        };
        let plan = BatchPlan::new(targets, state_payload()).expect("plan");
        let first: BatchSummary = plan.clone().apply(&mut api);

        api.failing.clear();
        let retry = plan
            .retain_targets(&first.failed_target_ids())
            .expect("retry plan")
            .apply(&mut api);
        assert_eq!(retry.total(), 1);
        assert_eq!(retry.success_count, 1);
        assert_eq!(api.updated, vec!["wi-1".to_string(), "wi-2".to_string()]);
    }
}
