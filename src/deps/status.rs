use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::graph::{attr_str, edge_attributes, edge_unit_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No pending input anywhere upstream.
    Green,
    /// Downstream of a unit with pending input.
    Yellow,
    /// Has at least one pending incoming edge.
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEdge {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edge_id: String,
    pub from_unit_id: String,
    pub from_output: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub in_digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub out_digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_in_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_out_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub incoming_ok: usize,
    pub incoming_pending: usize,
    pub incoming_unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit_id: String,
    pub status: HealthStatus,
    pub incoming: Vec<IncomingEdge>,
    pub summary: StatusSummary,
}

fn status_rank(status: &str) -> u8 {
    match status {
        "pending" => 0,
        "ok" => 2,
        _ => 1,
    }
}

/// Status of `unit` against a parsed graph state. A missing or malformed graph yields
/// green with no edges.
pub(super) fn compute_status(graph: &Value, unit: &str) -> UnitStatus {
    let mut downstream: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut red = BTreeSet::new();
    let mut incoming = Vec::new();

    for attrs in edge_attributes(graph) {
        let from = edge_unit_id(&attr_str(attrs, "from_unit_id"));
        let to = edge_unit_id(&attr_str(attrs, "to_unit_id"));
        let status = attr_str(attrs, "status");
        if status == "pending" {
            red.insert(to.clone());
        }
        downstream.entry(from.clone()).or_default().push(to.clone());
        if to == unit {
            incoming.push(IncomingEdge {
                edge_id: attr_str(attrs, "id"),
                from_unit_id: from,
                from_output: attr_str(attrs, "from_output"),
                status,
                in_digest: attr_str(attrs, "in_digest"),
                out_digest: attr_str(attrs, "out_digest"),
                last_in_at: attr_str(attrs, "last_in_at"),
                last_out_at: attr_str(attrs, "last_out_at"),
            });
        }
    }

    // Everything reachable from a red unit (and not itself red) is yellow.
    let mut seen: BTreeSet<String> = red.iter().cloned().collect();
    let mut queue: VecDeque<String> = red.iter().cloned().collect();
    let mut yellow = BTreeSet::new();
    while let Some(current) = queue.pop_front() {
        for next in downstream.get(&current).into_iter().flatten() {
            if seen.insert(next.clone()) {
                yellow.insert(next.clone());
                queue.push_back(next.clone());
            }
        }
    }

    let mut summary = StatusSummary::default();
    for edge in &incoming {
        match edge.status.as_str() {
            "ok" => summary.incoming_ok += 1,
            "pending" => summary.incoming_pending += 1,
            _ => summary.incoming_unknown += 1,
        }
    }
    incoming.sort_by(|a, b| status_rank(&a.status).cmp(&status_rank(&b.status)).then_with(|| a.from_unit_id.cmp(&b.from_unit_id)));

    let status = if red.contains(unit) {
        HealthStatus::Red
    } else if yellow.contains(unit) {
        HealthStatus::Yellow
    } else {
        HealthStatus::Green
    };
    UnitStatus { unit_id: unit.to_string(), status, incoming, summary }
}
