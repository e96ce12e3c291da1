//! Local JSON snapshot of a project's work items.
//!
//! The file keeps the list-response shape (`{"project": .., "results": [..]}`)
//! so a page exported from the API can be imported unchanged.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::api::{WorkItemReadApi, WorkItemWriteApi};
use crate::payload::MutationPayload;
use crate::workitem::WorkItem;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub results: Vec<WorkItem>,
}

/// A list-response page; unlike [`Snapshot`], `results` must be present.
#[derive(Deserialize)]
struct ExportPage {
    #[serde(default)]
    project: Option<String>,
    results: Vec<WorkItem>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExportRepr {
    Page(ExportPage),
    Items(Vec<WorkItem>),
}

#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    snapshot: Snapshot,
    request_count: usize,
    dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub item_count: usize,
    pub project: Option<String>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, snapshot: Snapshot) -> Self {
        Self {
            path: path.into(),
            snapshot,
            request_count: 0,
            dirty: false,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!(
                "no work item snapshot at {}; run `planetool import <file>` first",
                path.display()
            );
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Self::new(path, snapshot))
    }

    /// Validate an API export and write it as the snapshot at `path`.
    pub fn import(source: &Path, path: &Path, project: Option<&str>) -> Result<ImportReport> {
        let content = fs::read_to_string(source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        let export: ExportRepr = serde_json::from_str(&content).with_context(|| {
            format!(
                "failed to parse work item export {}: expected an object with a \
                 `results` array or a bare array of work items",
                source.display()
            )
        })?;
        let mut snapshot = match export {
            ExportRepr::Page(page) => Snapshot {
                project: page.project,
                results: page.results,
            },
            ExportRepr::Items(results) => Snapshot {
                project: None,
                results,
            },
        };
        if let Some(project) = project {
            snapshot.project = Some(project.to_string());
        }
        validate_items(&snapshot.results)
            .with_context(|| format!("invalid work item export {}", source.display()))?;

        let store = Self::new(path, snapshot);
        store.save()?;
        tracing::info!(
            items = store.snapshot.results.len(),
            path = %path.display(),
            "imported work item snapshot"
        );
        Ok(ImportReport {
            item_count: store.snapshot.results.len(),
            project: store.snapshot.project,
        })
    }

    pub fn project(&self) -> Option<&str> {
        self.snapshot.project.as_deref()
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.snapshot.results
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let mut rendered =
            serde_json::to_string_pretty(&self.snapshot).context("failed to serialize snapshot")?;
        rendered.push('\n');
        fs::write(&self.path, rendered)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Persist only when an update landed since the last open.
    pub fn save_if_dirty(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.save()?;
        self.dirty = false;
        Ok(true)
    }

    fn position(&self, work_item_id: &str) -> Result<usize> {
        self.snapshot
            .results
            .iter()
            .position(|item| item.id == work_item_id)
            .ok_or_else(|| anyhow::anyhow!("work item not found: {work_item_id}"))
    }
}

impl WorkItemReadApi for SnapshotStore {
    fn list_work_items(&mut self) -> Result<Vec<WorkItem>> {
        self.request_count += 1;
        Ok(self.snapshot.results.clone())
    }

    fn get_work_item(&mut self, work_item_id: &str) -> Result<WorkItem> {
        self.request_count += 1;
        let index = self.position(work_item_id)?;
        Ok(self.snapshot.results[index].clone())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WorkItemWriteApi for SnapshotStore {
    fn update_work_item(
        &mut self,
        work_item_id: &str,
        payload: &MutationPayload,
    ) -> Result<WorkItem> {
        self.request_count += 1;
        payload.validate()?;
        let index = self.position(work_item_id)?;
        let item = &mut self.snapshot.results[index];
        payload.apply_to(item);
        self.dirty = true;
        Ok(item.clone())
    }
}

fn validate_items(items: &[WorkItem]) -> Result<()> {
    let mut seen = HashSet::new();
    for item in items {
        if item.id.trim().is_empty() {
            bail!("work item '{}' has an empty id", item.name);
        }
        if !seen.insert(item.id.as_str()) {
            bail!("duplicate work item id: {}", item.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{Snapshot, SnapshotStore};
    use crate::api::{WorkItemReadApi, WorkItemWriteApi};
    use crate::payload::{FieldChange, MutationPayload};
    use crate::workitem::WorkItem;

    #[test]
    fn import_accepts_list_response_page() {
        let temp = tempdir().expect("tempdir");
        let export = temp.path().join("export.json");
        fs::write(
            &export,
            r#"{"total_count": 2, "next_page_results": false, "results": [
                {"id": "wi-1", "name": "API integration module", "sequence_id": 1},
                {"id": "wi-2", "name": "Dashboard analytics widget", "sequence_id": 2}
            ]}"#,
        )
        .expect("write export");
        let snapshot_path = temp.path().join(".planetool").join("work-items.json");

        let report = SnapshotStore::import(&export, &snapshot_path, Some("CORE")).expect("import");
        assert_eq!(report.item_count, 2);
        assert_eq!(report.project.as_deref(), Some("CORE"));

        let store = SnapshotStore::open(&snapshot_path).expect("open");
        assert_eq!(store.project(), Some("CORE"));
        assert_eq!(store.items()[1].name, "Dashboard analytics widget");
        assert!(
            fs::read_to_string(&snapshot_path)
                .expect("read snapshot")
                .ends_with("}\n")
        );
    }

    #[test]
    fn import_accepts_bare_array_and_rejects_duplicates() {
        let temp = tempdir().expect("tempdir");
        let snapshot_path = temp.path().join("work-items.json");

        let bare = temp.path().join("bare.json");
        fs::write(&bare, r#"[{"id": "wi-1", "name": "One"}]"#).expect("write export");
        let report = SnapshotStore::import(&bare, &snapshot_path, None).expect("import");
        assert_eq!(report.item_count, 1);
        assert!(report.project.is_none());

        let duplicated = temp.path().join("dup.json");
        fs::write(
            &duplicated,
            r#"[{"id": "wi-1", "name": "One"}, {"id": "wi-1", "name": "Again"}]"#,
        )
        .expect("write export");
        let error =
            SnapshotStore::import(&duplicated, &snapshot_path, None).expect_err("must fail");
        assert!(format!("{error:#}").contains("duplicate work item id: wi-1"));
    }

    #[test]
    fn import_without_results_keeps_existing_snapshot() {
        let temp = tempdir().expect("tempdir");
        let snapshot_path = temp.path().join("work-items.json");
        let good = temp.path().join("good.json");
        fs::write(
            &good,
            r#"[{"id": "wi-1", "name": "One"}, {"id": "wi-2", "name": "Two"}]"#,
        )
        .expect("write export");
        SnapshotStore::import(&good, &snapshot_path, None).expect("import");
        let before = fs::read_to_string(&snapshot_path).expect("read snapshot");

        let wrong = temp.path().join("wrong.json");
        fs::write(&wrong, r#"{"data": [{"id": "wi-9", "name": "Nine"}]}"#)
            .expect("write export");
        let error = SnapshotStore::import(&wrong, &snapshot_path, None).expect_err("must fail");
        assert!(format!("{error:#}").contains("`results` array"));

        assert_eq!(
            fs::read_to_string(&snapshot_path).expect("read snapshot"),
            before
        );
        assert_eq!(SnapshotStore::open(&snapshot_path).expect("open").items().len(), 2);
    }

    #[test]
    fn open_reports_missing_snapshot() {
        let temp = tempdir().expect("tempdir");
        let error = SnapshotStore::open(&temp.path().join("missing.json")).expect_err("must fail");
        assert!(error.to_string().contains("planetool import"));
    }

    #[test]
    fn update_applies_payload_and_persists() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("work-items.json");
        let mut item = WorkItem::new("wi-1", "Old title");
        item.labels = vec!["L1".to_string()];
        let mut store = SnapshotStore::new(
            &path,
            Snapshot {
                project: None,
                results: vec![item],
            },
        );

        let payload = MutationPayload {
            labels: FieldChange::Set(vec!["L1".to_string(), "L2".to_string()]),
            state: FieldChange::Set("Done".to_string()),
            ..MutationPayload::default()
        };
        let updated = store.update_work_item("wi-1", &payload).expect("update");
        assert_eq!(updated.labels, vec!["L1".to_string(), "L2".to_string()]);
        assert!(store.is_dirty());
        assert!(store.save_if_dirty().expect("save"));
        assert!(!store.save_if_dirty().expect("second save"));

        let reopened = SnapshotStore::open(&path).expect("open");
        assert_eq!(reopened.items()[0].state.as_deref(), Some("Done"));
    }

    #[test]
    fn unknown_id_is_an_error_and_counts_as_request() {
        let mut store = SnapshotStore::new("unused.json", Snapshot::default());
        let error = store
            .update_work_item("wi-404", &MutationPayload::default())
            .expect_err("must fail");
        assert_eq!(error.to_string(), "work item not found: wi-404");
        assert!(store.get_work_item("wi-404").is_err());
        assert_eq!(store.request_count(), 2);
        assert!(!store.is_dirty());
    }
}
