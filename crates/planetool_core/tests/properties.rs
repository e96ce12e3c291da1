use anyhow::{Result, bail};
use planetool_core::api::{WorkItemReadApi, WorkItemWriteApi};
use planetool_core::batch::BatchPlan;
use planetool_core::fuzzy::{MatchConfig, find_matches, score};
use planetool_core::merge::{MergeMode, dedupe, merge};
use planetool_core::payload::{FieldChange, MutationPayload};
use planetool_core::workitem::WorkItem;
use proptest::prelude::*;

#[derive(Default)]
struct CountingApi {
    request_count: usize,
}

impl WorkItemReadApi for CountingApi {
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

impl WorkItemWriteApi for CountingApi {
    fn update_work_item(
        &mut self,
        work_item_id: &str,
        _payload: &MutationPayload,
    ) -> Result<WorkItem> {
        self.request_count += 1;
        Ok(WorkItem::new(work_item_id, "updated"))
    }
}

fn arb_title() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z _/-]{0,30}"
}

fn arb_values() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-e]{1,2}", 0..8)
}

proptest! {
    #[test]
    fn short_exact_substrings_score_at_least_80(
        prefix in "[a-zA-Z ]{0,20}",
        needle in "[a-z]{1,3}",
        suffix in "[a-zA-Z ]{0,20}",
        upper in any::<bool>(),
    ) {
        let candidate = format!("{prefix}{needle}{suffix}");
        let pattern = if upper { needle.to_uppercase() } else { needle.clone() };
        prop_assert!(score(&pattern, &candidate) >= 80);
    }

    #[test]
    fn scores_stay_in_range(pattern in "[a-z ]{0,6}", candidate in arb_title()) {
        prop_assert!(score(&pattern, &candidate) <= 100);
    }

    #[test]
    fn matches_respect_threshold_and_order(
        pattern in "[a-z]{1,4}",
        candidates in prop::collection::vec(arb_title(), 0..12),
        min_score in 0i64..=100,
    ) {
        let config = MatchConfig::new(min_score, 0);
        let results = find_matches(&pattern, &candidates, &config);
        for result in &results {
            prop_assert!(i64::from(result.score) >= min_score);
            prop_assert!(result.candidate_index < candidates.len());
        }
        for pair in results.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn empty_pattern_never_matches(candidates in prop::collection::vec(arb_title(), 0..8)) {
        let config = MatchConfig::new(0, 0);
        prop_assert!(find_matches("", &candidates, &config).is_empty());
    }

    #[test]
    fn replace_equals_dedupe_of_incoming(incoming in arb_values(), existing in arb_values()) {
        prop_assert_eq!(merge(MergeMode::Replace, &incoming, &existing), dedupe(&incoming));
    }

    #[test]
    fn add_is_idempotent(incoming in arb_values(), existing in arb_values()) {
        let once = merge(MergeMode::Add, &incoming, &existing);
        let twice = merge(MergeMode::Add, &incoming, &once);
        prop_assert_eq!(twice, once.clone());
        for value in incoming.iter().chain(existing.iter()) {
            prop_assert!(once.contains(value));
        }
    }

    #[test]
    fn clear_is_always_empty(incoming in arb_values(), existing in arb_values()) {
        prop_assert!(merge(MergeMode::Clear, &incoming, &existing).is_empty());
    }

    #[test]
    fn dry_run_previews_each_target_in_order(count in 1usize..20) {
        let targets: Vec<WorkItem> = (0..count)
            .map(|index| WorkItem::new(format!("wi-{index}"), format!("Item {index}")))
            .collect();
        let payload = MutationPayload {
            state: FieldChange::Set("Done".to_string()),
            ..MutationPayload::default()
        };
        let plan = BatchPlan::new(targets.clone(), payload).expect("plan");
        let api = CountingApi::default();

        let report = plan.dry_run().expect("dry run");
        prop_assert_eq!(report.lines.len(), count);
        for (line, target) in report.lines.iter().zip(&targets) {
            prop_assert_eq!(&line.target_id, &target.id);
        }
        prop_assert_eq!(api.request_count(), 0);

        let mut api = api;
        let summary = plan.apply(&mut api);
        prop_assert_eq!(summary.success_count, count);
        prop_assert_eq!(api.request_count(), count);
    }
}
