use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::status::{compute_status, UnitStatus};
use super::GraphUpdater;
use crate::error::{StoreError, StoreResult};
use crate::identity::{OrgId, RequestContext};
use crate::storage::{LockInfo, SharedUnitStore};

pub const GRAPH_UNIT_ID: &str = "__statesman_system";
pub const DEPENDENCY_RESOURCE_TYPE: &str = "statesman_dependency";
const GRAPH_LOCK_OWNER: &str = "statesman-deps";

const EDGE_OK: &str = "ok";
const EDGE_PENDING: &str = "pending";
const EDGE_UNKNOWN: &str = "unknown";

/// Unit ids inside edges may carry slashes or a trailing `/terraform.tfstate`.
pub fn edge_unit_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    trimmed.strip_suffix("/terraform.tfstate").unwrap_or(trimmed).to_string()
}

/// SHA-256 (hex) over the compact JSON form of an output value. `serde_json` maps are
/// key-ordered, so equal values hash equally whatever order their keys arrived in.
pub fn output_digest(value: &Value) -> String { hex::encode(Sha256::digest(value.to_string().as_bytes())) }

/// Attribute as text: strings verbatim, null or missing as empty, anything else as JSON.
pub(super) fn attr_str(attrs: &Map<String, Value>, key: &str) -> String {
    match attrs.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn dependency_resources(graph: &Value) -> impl Iterator<Item = &Value> {
    graph
        .get("resources")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|r| r.get("type").and_then(Value::as_str) == Some(DEPENDENCY_RESOURCE_TYPE))
}

/// Attribute maps of every dependency instance in the graph state.
pub(super) fn edge_attributes(graph: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    dependency_resources(graph)
        .filter_map(|r| r.get("instances").and_then(Value::as_array))
        .flatten()
        .filter_map(|i| i.get("attributes").and_then(Value::as_object))
}

fn for_each_edge_mut(graph: &mut Value, mut visit: impl FnMut(&mut Map<String, Value>)) {
    let Some(resources) = graph.get_mut("resources").and_then(Value::as_array_mut) else {
        return;
    };
    for resource in resources {
        if resource.get("type").and_then(Value::as_str) != Some(DEPENDENCY_RESOURCE_TYPE) {
            continue;
        }
        let Some(instances) = resource.get_mut("instances").and_then(Value::as_array_mut) else {
            continue;
        };
        for attrs in instances.iter_mut().filter_map(|i| i.get_mut("attributes")).filter_map(Value::as_object_mut) {
            visit(attrs);
        }
    }
}

fn set_attr(attrs: &mut Map<String, Value>, key: &str, value: &str) -> bool {
    if attr_str(attrs, key) == value {
        return false;
    }
    attrs.insert(key.to_string(), Value::from(value));
    true
}

/// Applies a write of `unit` (whose outputs are `outputs`, if parseable) to every edge.
/// Outgoing edges get a fresh input digest and a status relative to the acknowledged
/// digest; incoming edges with a known input digest are acknowledged.
fn refresh_edges(graph: &mut Value, unit: &str, outputs: Option<&Map<String, Value>>, now: &str) -> bool {
    let mut changed = false;
    for_each_edge_mut(graph, |attrs| {
        let from = edge_unit_id(&attr_str(attrs, "from_unit_id"));
        let to = edge_unit_id(&attr_str(attrs, "to_unit_id"));

        if from == unit {
            let output = attr_str(attrs, "from_output");
            match outputs.and_then(|o| o.get(&output)) {
                Some(entry) => {
                    let digest = output_digest(entry.get("value").unwrap_or(&Value::Null));
                    if set_attr(attrs, "in_digest", &digest) {
                        attrs.insert("last_in_at".into(), Value::from(now));
                        changed = true;
                    }
                    let status = if attr_str(attrs, "out_digest") == digest { EDGE_OK } else { EDGE_PENDING };
                    changed |= set_attr(attrs, "status", status);
                }
                None => changed |= set_attr(attrs, "status", EDGE_UNKNOWN),
            }
        }

        if to == unit {
            let in_digest = attr_str(attrs, "in_digest");
            if !in_digest.is_empty() {
                if set_attr(attrs, "out_digest", &in_digest) {
                    attrs.insert("last_out_at".into(), Value::from(now));
                    changed = true;
                }
                changed |= set_attr(attrs, "status", EDGE_OK);
            }
        }
    });
    changed
}

fn parse_outputs(state: &[u8]) -> Option<Map<String, Value>> {
    let mut state: Value = serde_json::from_slice(state).ok()?;
    match state.get_mut("outputs")?.take() {
        Value::Object(outputs) => Some(outputs),
        _ => None,
    }
}

fn bump_serial(graph: &mut Value) {
    let serial = graph.get("serial").and_then(Value::as_u64).unwrap_or(0);
    if let Some(obj) = graph.as_object_mut() {
        obj.insert("serial".into(), Value::from(serial + 1));
    }
}

/// Graph updater over a unit store. Calls run under the system principal.
pub struct DependencyGraph {
    store: SharedUnitStore,
    org: OrgId,
}

impl DependencyGraph {
    pub fn new(store: SharedUnitStore, org: OrgId) -> Self { Self { store, org } }

    fn ctx(&self) -> RequestContext { RequestContext::system(self.org.clone()) }

    async fn refresh_locked(&self, ctx: &RequestContext, unit: &str, state: &[u8], lock_id: &str) -> StoreResult<bool> {
        let bytes = self.store.download(ctx, GRAPH_UNIT_ID).await?;
        if bytes.is_empty() {
            return Ok(false);
        }
        let mut graph: Value = serde_json::from_slice(&bytes)?;
        let outputs = parse_outputs(state);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        if !refresh_edges(&mut graph, unit, outputs.as_ref(), &now) {
            return Ok(false);
        }
        bump_serial(&mut graph);
        self.store.upload(ctx, GRAPH_UNIT_ID, &serde_json::to_vec(&graph)?, lock_id).await?;
        Ok(true)
    }
}

#[async_trait]
impl GraphUpdater for DependencyGraph {
    async fn update_on_write(&self, unit_id: &str, state: &[u8]) -> StoreResult<bool> {
        let unit = edge_unit_id(unit_id);
        if unit == GRAPH_UNIT_ID {
            return Ok(false);
        }
        let ctx = self.ctx();
        let lock = LockInfo {
            id: format!("deps-{}", uuid::Uuid::new_v4()),
            who: GRAPH_LOCK_OWNER.to_string(),
            version: "1.0.0".to_string(),
            created: Utc::now(),
        };
        match self.store.lock(&ctx, GRAPH_UNIT_ID, &lock).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                debug!(target: "statesman::deps", unit_id = %unit, "no graph unit; skipping");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let result = self.refresh_locked(&ctx, &unit, state, &lock.id).await;
        if let Err(e) = self.store.unlock(&ctx, GRAPH_UNIT_ID, &lock.id).await {
            warn!(target: "statesman::deps", error = %e, lock_id = %lock.id, "graph unlock failed");
        }
        if let Ok(true) = result {
            debug!(target: "statesman::deps", unit_id = %unit, "graph updated");
        }
        result
    }

    async fn unit_status(&self, unit_id: &str) -> StoreResult<UnitStatus> {
        let unit = edge_unit_id(unit_id);
        let graph = match self.store.download(&self.ctx(), GRAPH_UNIT_ID).await {
            Ok(bytes) => serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null),
            Err(StoreError::NotFound(_)) => Value::Null,
            Err(e) => return Err(e),
        };
        Ok(compute_status(&graph, &unit))
    }
}
