use super::{Coordinate, EstimationError, ProviderInitError, RoutingProvider};
use crate::eta::{EtaResult, Measure};

const EARTH_RADIUS_KM: f64 = 6371.0;
const DEFAULT_AVERAGE_SPEED_KMH: f64 = 25.0;

/// Routes "as the crow flies": haversine distance, duration at a constant
/// average speed. Needs no network and never fails once constructed.
#[derive(Debug, Clone)]
pub struct StraightLineProvider {
    average_speed_kmh: f64,
}

impl StraightLineProvider {
    pub fn with_average_speed(average_speed_kmh: f64) -> Result<Self, ProviderInitError> {
        if !(average_speed_kmh > 0.0 && average_speed_kmh.is_finite()) {
            return Err(ProviderInitError::Misconfigured(format!(
                "average speed must be positive, got {average_speed_kmh}"
            )));
        }
        Ok(Self { average_speed_kmh })
    }

    pub fn average_speed_kmh(&self) -> f64 {
        self.average_speed_kmh
    }
}

impl Default for StraightLineProvider {
    fn default() -> Self {
        Self { average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH }
    }
}

impl RoutingProvider for StraightLineProvider {
    async fn initialize(&self) -> Result<(), ProviderInitError> {
        Ok(())
    }

    async fn estimate(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<EtaResult, EstimationError> {
        let distance_km = haversine_km(origin, destination);
        let duration_secs = distance_km / self.average_speed_kmh * 3600.0;
        Ok(EtaResult {
            distance: Measure::from_metres(distance_km * 1000.0),
            duration: Measure::from_seconds(duration_secs),
        })
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        let p = Coordinate::new(40.7128, -74.0060);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_km(Coordinate::new(40.0, -74.0), Coordinate::new(41.0, -74.0));
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[tokio::test]
    async fn test_estimate_uses_average_speed() {
        let provider = StraightLineProvider::with_average_speed(60.0).unwrap();
        let result = provider
            .estimate(Coordinate::new(40.0, -74.0), Coordinate::new(41.0, -74.0))
            .await
            .unwrap();

        // ~111 km at 60 km/h is ~111 minutes
        assert!((result.distance.value - 111_195.0).abs() < 100.0);
        assert!((result.duration.value - 6672.0).abs() < 10.0);
        assert_eq!(result.distance.text, "111.2 km");
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let provider = StraightLineProvider::default();
        assert!(provider.initialize().await.is_ok());
        assert!(provider.initialize().await.is_ok());
    }
}
