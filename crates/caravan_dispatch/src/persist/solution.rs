use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::reconcile::mapping::{MappingEntry, NodeKind};

/// One persisted stop. `stop_sequence` is 1-based and contiguous per route;
/// gaps left by filtered synthetic/depot nodes never surface here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub stop_sequence: usize,
    pub node_index: usize,
    pub order_id: Option<String>,
    pub location_id: Option<String>,
    pub kind: NodeKind,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteRecord {
    pub route_number: usize,
    pub vehicle_id: Option<String>,
    /// Node-sequence snapshot in the compacted index space, kept for audit.
    pub sequence: Vec<usize>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub start_time: Option<Timestamp>,
    pub initial_load: Option<f64>,
    pub stops: Vec<StopRecord>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionTotals {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub cost: f64,
    pub vehicle_count: usize,
}

/// The assembled solution handed to the persistence collaborator. Keeps the
/// raw solver text and the mapping table for audit, and points at the parent
/// solution when this solve superseded one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolutionPayload {
    pub totals: SolutionTotals,
    pub routes: Vec<RouteRecord>,
    pub mapping: Vec<MappingEntry>,
    pub raw_output: String,
    pub reoptimized: bool,
    pub parent_solution_id: Option<String>,
}

/// Precomputed edge weights over the compacted node space, indexed
/// `[from][to]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeMatrices {
    pub distance: Vec<Vec<f64>>,
    pub duration: Vec<Vec<f64>>,
}

/// Externally-supplied inputs for the grand totals.
#[derive(Debug, Default)]
pub struct TotalsInput {
    /// Encoded cost value; parse failures default to zero.
    pub cost: Option<String>,
    pub matrices: Option<EdgeMatrices>,
    pub raw_output: String,
    pub reoptimized: bool,
}
