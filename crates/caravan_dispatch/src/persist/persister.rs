use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::reconcile::mapping::{CleanedRoute, MappingEntry, NodeKind};

use super::solution::{
    EdgeMatrices, RouteRecord, SolutionPayload, SolutionTotals, StopRecord, TotalsInput,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RouteMeasure {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Route-metrics collaborator: aggregate distance/duration over ordered
/// `(lat, lon)` waypoints. Only consulted when no edge matrix is supplied.
#[async_trait]
pub trait RouteMetrics: Send + Sync {
    async fn measure(&self, waypoints: &[(f64, f64)]) -> Result<RouteMeasure, anyhow::Error>;
}

/// Persistence collaborator: an opaque transactional call that stores the
/// assembled payload and returns a generated solution id, or fails atomically.
#[async_trait]
pub trait SolutionStore: Send + Sync {
    async fn store(&self, payload: &SolutionPayload) -> Result<String, anyhow::Error>;

    /// Copies driver assignments from the parent solution's routes onto the
    /// corresponding routes of the child.
    async fn copy_driver_assignments(
        &self,
        parent_id: &str,
        child_id: &str,
    ) -> Result<(), anyhow::Error>;
}

/// Turns final route sequences plus the mapping table into a durable
/// solution, linking re-optimizations to their parent.
pub struct LineagePersister {
    store: Arc<dyn SolutionStore>,
    metrics: Arc<dyn RouteMetrics>,
}

impl LineagePersister {
    pub fn new(store: Arc<dyn SolutionStore>, metrics: Arc<dyn RouteMetrics>) -> Self {
        LineagePersister { store, metrics }
    }

    pub async fn persist(
        &self,
        routes: &[CleanedRoute],
        mapping: &[MappingEntry],
        totals_input: TotalsInput,
        parent_solution_id: Option<&str>,
    ) -> Result<String, DispatchError> {
        validate_mapping(mapping)?;

        let mut totals = SolutionTotals {
            cost: parse_cost(totals_input.cost.as_deref()),
            ..SolutionTotals::default()
        };

        let mut records = Vec::with_capacity(routes.len());
        for route in routes {
            let record = self
                .build_route(route, mapping, totals_input.matrices.as_ref())
                .await?;
            totals.distance_meters += record.distance_meters;
            totals.duration_seconds += record.duration_seconds;
            records.push(record);
        }
        totals.vehicle_count = records.len();

        let payload = SolutionPayload {
            totals,
            routes: records,
            mapping: mapping.to_vec(),
            raw_output: totals_input.raw_output,
            reoptimized: totals_input.reoptimized,
            parent_solution_id: parent_solution_id.map(str::to_owned),
        };

        let solution_id = self
            .store
            .store(&payload)
            .await
            .map_err(DispatchError::Persistence)?;
        info!(
            %solution_id,
            routes = payload.routes.len(),
            reoptimized = payload.reoptimized,
            "solution persisted"
        );

        if let Some(parent_id) = parent_solution_id {
            // Non-fatal: the new solution stands, assignments may need
            // manual re-entry.
            if let Err(error) = self
                .store
                .copy_driver_assignments(parent_id, &solution_id)
                .await
            {
                warn!(%solution_id, parent_id, %error, "driver assignment carry-forward failed");
            }
        }

        Ok(solution_id)
    }

    async fn build_route(
        &self,
        route: &CleanedRoute,
        mapping: &[MappingEntry],
        matrices: Option<&EdgeMatrices>,
    ) -> Result<RouteRecord, DispatchError> {
        // Full node path: depot out, every stop, depot back.
        let path: Vec<usize> = std::iter::once(0)
            .chain(route.sequence.iter().copied())
            .chain(std::iter::once(0))
            .collect();

        for &index in &path {
            if index >= mapping.len() {
                return Err(DispatchError::Reconciliation(format!(
                    "route {} references node {index} outside the mapping table ({} entries)",
                    route.route_number,
                    mapping.len()
                )));
            }
        }

        let measure = match matrices {
            Some(matrices) => sum_matrix(matrices, &path, route.route_number)?,
            None => {
                let waypoints: Vec<(f64, f64)> = path
                    .iter()
                    .map(|&index| (mapping[index].lat, mapping[index].lon))
                    .collect();
                self.metrics
                    .measure(&waypoints)
                    .await
                    .map_err(DispatchError::Persistence)?
            }
        };

        let mut stops = Vec::with_capacity(route.stops.len());
        for stop in &route.stops {
            let entry = mapping.get(stop.node_index).ok_or_else(|| {
                DispatchError::Reconciliation(format!(
                    "route {} stop references node {} outside the mapping table ({} entries)",
                    route.route_number,
                    stop.node_index,
                    mapping.len()
                ))
            })?;
            if entry.is_dummy || stop.kind.is_synthetic() || stop.kind == NodeKind::Depot {
                continue;
            }
            stops.push(StopRecord {
                stop_sequence: stops.len() + 1,
                node_index: stop.node_index,
                order_id: stop.order_id.clone(),
                location_id: stop.location_id.clone(),
                kind: stop.kind,
                lat: stop.lat,
                lon: stop.lon,
            });
        }

        Ok(RouteRecord {
            route_number: route.route_number,
            vehicle_id: route.vehicle_id.clone(),
            sequence: route.sequence.clone(),
            distance_meters: measure.distance_meters,
            duration_seconds: measure.duration_seconds,
            start_time: route.start_time,
            initial_load: route.initial_load,
            stops,
        })
    }
}

/// Upfront input validation: the mapping table must be non-empty and its
/// first entry (the depot) must carry usable coordinates. Runs before any
/// solver work is scheduled, and again at the persistence seam.
pub fn validate_mapping(mapping: &[MappingEntry]) -> Result<(), DispatchError> {
    if mapping.is_empty() {
        return Err(DispatchError::Validation(String::from(
            "mapping table is empty, no routes can be built",
        )));
    }
    let depot = &mapping[0];
    if !coordinate_valid(depot.lat, depot.lon) {
        return Err(DispatchError::Validation(String::from(
            "depot entry is missing valid coordinates",
        )));
    }
    Ok(())
}

fn coordinate_valid(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

fn parse_cost(encoded: Option<&str>) -> f64 {
    encoded
        .and_then(|cost| cost.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn sum_matrix(
    matrices: &EdgeMatrices,
    path: &[usize],
    route_number: usize,
) -> Result<RouteMeasure, DispatchError> {
    let mut measure = RouteMeasure {
        distance_meters: 0.0,
        duration_seconds: 0.0,
    };
    for pair in path.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let distance = matrices
            .distance
            .get(from)
            .and_then(|row| row.get(to))
            .copied();
        let duration = matrices
            .duration
            .get(from)
            .and_then(|row| row.get(to))
            .copied();
        match (distance, duration) {
            (Some(distance), Some(duration)) => {
                measure.distance_meters += distance;
                measure.duration_seconds += duration;
            }
            _ => {
                return Err(DispatchError::Persistence(anyhow::anyhow!(
                    "route {route_number}: edge matrix does not cover arc {from} -> {to}"
                )));
            }
        }
    }
    Ok(measure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_parsing_defaults_to_zero() {
        assert_eq!(parse_cost(Some("1042.7")), 1042.7);
        assert_eq!(parse_cost(Some(" 12 ")), 12.0);
        assert_eq!(parse_cost(Some("not-a-number")), 0.0);
        assert_eq!(parse_cost(None), 0.0);
    }

    #[test]
    fn coordinate_validity() {
        assert!(coordinate_valid(50.85, 4.35));
        assert!(coordinate_valid(0.0, 0.0));
        assert!(!coordinate_valid(f64::NAN, 4.35));
        assert!(!coordinate_valid(95.0, 4.35));
        assert!(!coordinate_valid(50.85, 200.0));
    }
}
