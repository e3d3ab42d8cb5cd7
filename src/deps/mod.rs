//! Cross-unit dependency tracking.
//!
//! A reserved unit holds a Terraform state whose `statesman_dependency` resources describe
//! edges "output `o` of unit A feeds unit B". After every write the updater refreshes the
//! edges touching the written unit inside one locked read-modify-write of that unit.

use async_trait::async_trait;

mod graph;
mod status;

pub use graph::{edge_unit_id, output_digest, DependencyGraph, DEPENDENCY_RESOURCE_TYPE, GRAPH_UNIT_ID};
pub use status::{HealthStatus, IncomingEdge, StatusSummary, UnitStatus};

use crate::error::StoreResult;

#[async_trait]
pub trait GraphUpdater: Send + Sync {
    /// Refreshes edges from and into `unit_id` after it was written with `state`.
    /// Returns whether the graph changed. A missing graph unit is not an error.
    async fn update_on_write(&self, unit_id: &str, state: &[u8]) -> StoreResult<bool>;

    async fn unit_status(&self, unit_id: &str) -> StoreResult<UnitStatus>;
}
