use crate::catalog::RouteCatalog;
use crate::fleet::Bus;
use crate::provider::{Coordinate, EstimationError, ProviderInitError, RoutingProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A quantity with its human-readable rendering, e.g. `{ text: "2.5 km", value: 2500.0 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub text: String,
    pub value: f64,
}

impl Measure {
    pub fn from_metres(metres: f64) -> Self {
        let metres = metres.max(0.0);
        let text = if metres < 1000.0 {
            format!("{} m", metres.round() as u64)
        } else {
            format!("{:.1} km", metres / 1000.0)
        };
        Self { text, value: metres }
    }

    pub fn from_seconds(seconds: f64) -> Self {
        let seconds = seconds.max(0.0);
        let minutes = ((seconds / 60.0).round() as u64).max(1);
        let text = match (minutes / 60, minutes % 60) {
            (0, 1) => "1 min".to_string(),
            (0, m) => format!("{m} mins"),
            (h, 0) => plural(h, "hour"),
            (h, m) => format!("{} {}", plural(h, "hour"), plural(m, "min")),
        };
        Self { text, value: seconds }
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Distance (metres) and travel time (seconds) from a bus to a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaResult {
    pub distance: Measure,
    pub duration: Measure,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EtaError {
    #[error(transparent)]
    ProviderInit(#[from] ProviderInitError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

/// Resolves a bus's target stop through the catalog and asks the routing
/// provider for distance and duration. No caching, no retries.
#[derive(Debug)]
pub struct EtaEstimator<P> {
    catalog: Arc<RouteCatalog>,
    provider: Arc<P>,
}

impl<P> Clone for EtaEstimator<P> {
    fn clone(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: RoutingProvider> EtaEstimator<P> {
    pub fn new(catalog: Arc<RouteCatalog>, provider: Arc<P>) -> Self {
        Self { catalog, provider }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// `Ok(None)` when the bus's route or the stop on that route cannot be
    /// resolved; the provider is not contacted in that case.
    pub async fn estimate_eta(
        &self,
        bus: &Bus,
        target_stop_id: &str,
    ) -> Result<Option<EtaResult>, EtaError> {
        let Some(route) = self.catalog.find_route(&bus.route_id) else {
            debug!(bus = %bus.id, route = %bus.route_id, "ETA requested for bus on unknown route");
            return Ok(None);
        };
        let Some(stop) = route.find_stop(target_stop_id) else {
            debug!(bus = %bus.id, stop = %target_stop_id, "ETA requested for stop not on route");
            return Ok(None);
        };

        let origin = Coordinate::new(bus.current_lat, bus.current_lng);
        let destination = Coordinate::new(stop.latitude, stop.longitude);

        self.provider.initialize().await.map_err(|e| {
            warn!("Routing provider initialization failed: {}", e);
            EtaError::from(e)
        })?;

        let result = self.provider.estimate(origin, destination).await.map_err(|e| {
            warn!(bus = %bus.id, stop = %target_stop_id, "ETA estimation failed: {}", e);
            EtaError::from(e)
        })?;

        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_text() {
        assert_eq!(Measure::from_metres(0.0).text, "0 m");
        assert_eq!(Measure::from_metres(845.4).text, "845 m");
        assert_eq!(Measure::from_metres(15_240.0).text, "15.2 km");
    }

    #[test]
    fn test_duration_text() {
        assert_eq!(Measure::from_seconds(10.0).text, "1 min");
        assert_eq!(Measure::from_seconds(60.0).text, "1 min");
        assert_eq!(Measure::from_seconds(600.0).text, "10 mins");
        assert_eq!(Measure::from_seconds(3600.0).text, "1 hour");
        assert_eq!(Measure::from_seconds(3900.0).text, "1 hour 5 mins");
        assert_eq!(Measure::from_seconds(7260.0).text, "2 hours 1 min");
    }

    #[test]
    fn test_measure_keeps_raw_value() {
        let m = Measure::from_seconds(427.0);
        assert_eq!(m.value, 427.0);
        assert_eq!(m.text, "7 mins");
    }
}
