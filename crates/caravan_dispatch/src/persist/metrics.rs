use async_trait::async_trait;

use super::persister::{RouteMeasure, RouteMetrics};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// As-the-crow-flies route metrics: haversine distance at a fixed speed.
/// Stands in for the external routing collaborator when none is wired up.
pub struct HaversineMetrics {
    pub speed_kmh: f64,
}

impl Default for HaversineMetrics {
    fn default() -> Self {
        HaversineMetrics { speed_kmh: 50.0 }
    }
}

#[async_trait]
impl RouteMetrics for HaversineMetrics {
    async fn measure(&self, waypoints: &[(f64, f64)]) -> Result<RouteMeasure, anyhow::Error> {
        let distance_meters: f64 = waypoints
            .windows(2)
            .map(|pair| haversine_meters(pair[0], pair[1]))
            .sum();
        let duration_seconds = distance_meters / (self.speed_kmh / 3.6);

        Ok(RouteMeasure {
            distance_meters,
            duration_seconds,
        })
    }
}

fn haversine_meters(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}
