use std::collections::HashMap;

use tracing::info;

use crate::error::DispatchError;

use super::mapping::{CleanedRoute, MappingEntry, NodeKind, RawRoute, RealStop, SyntheticNode};

/// Result of stage 1: stripped routes plus removal counters.
#[derive(Debug)]
pub struct ReconcileOutput {
    pub routes: Vec<CleanedRoute>,
    pub removed_dummy: usize,
    pub removed_ghost: usize,
}

/// Result of stage 2: the compacted mapping table, the routes rewritten into
/// the compacted index space, and the old-to-new index map itself.
#[derive(Debug)]
pub struct CompactOutput {
    pub mapping: Vec<MappingEntry>,
    pub routes: Vec<CleanedRoute>,
    pub index_map: HashMap<usize, usize>,
}

/// Stage 1: strip synthetic and depot nodes from each raw route, extracting
/// the start time from removed dummy starts and the initial load from removed
/// ghost pickups. Retained nodes keep their original indices and order.
///
/// A node index outside the mapping table fails the whole job: the solver
/// referenced a node we know nothing about, and dropping a stop silently is
/// never acceptable. A synthetic node with no matching descriptor is
/// tolerated and dropped without metadata.
pub fn reconcile(
    raw_routes: &[RawRoute],
    mapping: &[MappingEntry],
    synthetic_nodes: &[SyntheticNode],
) -> Result<ReconcileOutput, DispatchError> {
    let descriptors: HashMap<usize, &SyntheticNode> = synthetic_nodes
        .iter()
        .map(|node| (node.node_index, node))
        .collect();

    let mut removed_dummy = 0usize;
    let mut removed_ghost = 0usize;
    let mut routes = Vec::with_capacity(raw_routes.len());

    for raw in raw_routes {
        let mut route = CleanedRoute {
            route_number: raw.route_number,
            vehicle_id: None,
            sequence: Vec::with_capacity(raw.sequence.len()),
            start_time: None,
            initial_load: None,
            stops: Vec::new(),
        };

        for &index in &raw.sequence {
            let entry = mapping.get(index).ok_or_else(|| {
                DispatchError::Reconciliation(format!(
                    "route {} references node {index} outside the mapping table ({} entries)",
                    raw.route_number,
                    mapping.len()
                ))
            })?;

            let descriptor = descriptors.get(&index).copied();
            let kind = effective_kind(entry, descriptor);

            match kind {
                NodeKind::DummyStart => {
                    removed_dummy += 1;
                    if let Some(descriptor) = descriptor {
                        route.start_time = descriptor.start_time;
                    }
                    adopt_vehicle(&mut route, entry, descriptor);
                }
                NodeKind::GhostPickup => {
                    removed_ghost += 1;
                    if let Some(descriptor) = descriptor {
                        route.initial_load = descriptor.initial_load;
                    }
                    adopt_vehicle(&mut route, entry, descriptor);
                }
                NodeKind::Depot => {}
                NodeKind::Pickup | NodeKind::Delivery => {
                    route.sequence.push(index);
                    route.stops.push(RealStop {
                        node_index: index,
                        order_id: entry.order_id.clone(),
                        location_id: entry.location_id.clone(),
                        kind: entry.kind,
                        lat: entry.lat,
                        lon: entry.lon,
                    });
                }
            }
        }

        routes.push(route);
    }

    if removed_dummy + removed_ghost > 0 {
        info!(removed_dummy, removed_ghost, "stripped synthetic nodes");
    }

    Ok(ReconcileOutput {
        routes,
        removed_dummy,
        removed_ghost,
    })
}

/// Stage 2: walk the original mapping table and carry over every
/// non-synthetic entry, allocating new indices in order, then rewrite every
/// route sequence and stop into the new index space.
///
/// Must only run after *all* routes have been stripped: renumbering needs the
/// union of surviving nodes, so the stages are strictly sequential.
pub fn compact(
    mapping: &[MappingEntry],
    routes: Vec<CleanedRoute>,
) -> Result<CompactOutput, DispatchError> {
    let mut compacted = Vec::with_capacity(mapping.len());
    let mut index_map = HashMap::new();

    for (old_index, entry) in mapping.iter().enumerate() {
        if entry.kind.is_synthetic() {
            continue;
        }
        index_map.insert(old_index, compacted.len());
        compacted.push(entry.clone());
    }

    let mut reindexed = Vec::with_capacity(routes.len());
    for mut route in routes {
        route.sequence = route
            .sequence
            .iter()
            .map(|&old| translate(&index_map, old, route.route_number))
            .collect::<Result<_, _>>()?;

        for stop in &mut route.stops {
            stop.node_index = translate(&index_map, stop.node_index, route.route_number)?;
        }

        reindexed.push(route);
    }

    Ok(CompactOutput {
        mapping: compacted,
        routes: reindexed,
        index_map,
    })
}

fn translate(
    index_map: &HashMap<usize, usize>,
    old: usize,
    route_number: usize,
) -> Result<usize, DispatchError> {
    index_map.get(&old).copied().ok_or_else(|| {
        DispatchError::Reconciliation(format!(
            "route {route_number}: node {old} has no entry in the compacted mapping table"
        ))
    })
}

fn effective_kind(entry: &MappingEntry, descriptor: Option<&SyntheticNode>) -> NodeKind {
    if entry.kind.is_synthetic() {
        return entry.kind;
    }
    match descriptor {
        Some(descriptor) if descriptor.kind.is_synthetic() => descriptor.kind,
        _ => entry.kind,
    }
}

fn adopt_vehicle(route: &mut CleanedRoute, entry: &MappingEntry, descriptor: Option<&SyntheticNode>) {
    if route.vehicle_id.is_some() {
        return;
    }
    route.vehicle_id = descriptor
        .and_then(|d| d.vehicle_id.clone())
        .or_else(|| entry.vehicle_id.clone());
}
