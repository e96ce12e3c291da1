use anyhow::Result;

use crate::payload::MutationPayload;
use crate::workitem::WorkItem;

pub trait WorkItemReadApi {
    fn list_work_items(&mut self) -> Result<Vec<WorkItem>>;
    fn get_work_item(&mut self, work_item_id: &str) -> Result<WorkItem>;
    fn request_count(&self) -> usize;
}

/// Mutate-one collaborator. Each call is a single attempt; timeouts and
/// retries belong to the implementation.
pub trait WorkItemWriteApi: WorkItemReadApi {
    fn update_work_item(
        &mut self,
        work_item_id: &str,
        payload: &MutationPayload,
    ) -> Result<WorkItem>;
}
