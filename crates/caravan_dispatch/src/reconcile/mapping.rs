use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// What a solver node index stands for in the real world.
///
/// `DummyStart` and `GhostPickup` are synthetic: they only exist so the solver
/// can reason about a vehicle that is already mid-route (current position as a
/// pseudo-origin, on-board demand as a phantom pickup). They never survive
/// into persisted output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Depot,
    Pickup,
    Delivery,
    DummyStart,
    GhostPickup,
}

impl NodeKind {
    pub fn is_synthetic(self) -> bool {
        matches!(self, NodeKind::DummyStart | NodeKind::GhostPickup)
    }
}

/// One row of the mapping table. The table is an ordered array whose position
/// is the node index in the solver's flat node space; index 0 is always the
/// depot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub kind: NodeKind,
    pub order_id: Option<String>,
    pub location_id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub is_dummy: bool,
    /// Set on dummy/ghost entries: the vehicle whose state the node encodes.
    pub vehicle_id: Option<String>,
    /// Original orders consolidated onto a ghost pickup.
    pub consolidated_order_ids: Option<Vec<String>>,
}

impl MappingEntry {
    pub fn depot(lat: f64, lon: f64) -> Self {
        MappingEntry {
            kind: NodeKind::Depot,
            order_id: None,
            location_id: None,
            lat,
            lon,
            is_dummy: false,
            vehicle_id: None,
            consolidated_order_ids: None,
        }
    }

    pub fn pickup(order_id: &str, location_id: &str, lat: f64, lon: f64) -> Self {
        MappingEntry {
            kind: NodeKind::Pickup,
            order_id: Some(order_id.to_owned()),
            location_id: Some(location_id.to_owned()),
            lat,
            lon,
            is_dummy: false,
            vehicle_id: None,
            consolidated_order_ids: None,
        }
    }

    pub fn delivery(order_id: &str, location_id: &str, lat: f64, lon: f64) -> Self {
        MappingEntry {
            kind: NodeKind::Delivery,
            ..MappingEntry::pickup(order_id, location_id, lat, lon)
        }
    }

    pub fn dummy_start(vehicle_id: &str, lat: f64, lon: f64) -> Self {
        MappingEntry {
            kind: NodeKind::DummyStart,
            order_id: None,
            location_id: None,
            lat,
            lon,
            is_dummy: true,
            vehicle_id: Some(vehicle_id.to_owned()),
            consolidated_order_ids: None,
        }
    }

    pub fn ghost_pickup(vehicle_id: &str, lat: f64, lon: f64, order_ids: Vec<String>) -> Self {
        MappingEntry {
            kind: NodeKind::GhostPickup,
            order_id: None,
            location_id: None,
            lat,
            lon,
            is_dummy: true,
            vehicle_id: Some(vehicle_id.to_owned()),
            consolidated_order_ids: Some(order_ids),
        }
    }
}

/// Descriptor for a synthetic node injected by the augmented-instance builder.
/// Carries the vehicle-state metadata the reconciler extracts before the node
/// is dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticNode {
    pub node_index: usize,
    pub kind: NodeKind,
    pub vehicle_id: Option<String>,
    /// Departure time encoded on a dummy start node.
    pub start_time: Option<Timestamp>,
    /// On-board load encoded on a ghost pickup node.
    pub initial_load: Option<f64>,
}

/// One route as reported by the solver, synthetic nodes and all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRoute {
    pub route_number: usize,
    pub sequence: Vec<usize>,
}

/// A retained (non-synthetic, non-depot) stop on a cleaned route.
#[derive(Clone, Debug, PartialEq)]
pub struct RealStop {
    pub node_index: usize,
    pub order_id: Option<String>,
    pub location_id: Option<String>,
    pub kind: NodeKind,
    pub lat: f64,
    pub lon: f64,
}

/// A route after stage-1 stripping: synthetic and depot nodes removed, with
/// the vehicle-state metadata extracted from the removed synthetic nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct CleanedRoute {
    pub route_number: usize,
    pub vehicle_id: Option<String>,
    pub sequence: Vec<usize>,
    pub start_time: Option<Timestamp>,
    pub initial_load: Option<f64>,
    pub stops: Vec<RealStop>,
}
