use crate::catalog::ConfigError;
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;
use std::time::Duration;

// Fleet generation defaults
const MIN_BUSES_PER_ROUTE: u32 = 2;
const MAX_BUSES_PER_ROUTE: u32 = 3;
const BUS_CAPACITY: u32 = 40;
const MIN_INITIAL_OCCUPANCY: u32 = 5;
const MAX_INITIAL_OCCUPANCY: u32 = 40; // exclusive
const MIN_INITIAL_ETA_MIN: u32 = 3;
const MAX_INITIAL_ETA_MIN: u32 = 23; // exclusive
const MIN_SPEED_KMH: u32 = 10;
const MAX_SPEED_KMH: u32 = 40; // exclusive
const SPAWN_OFFSET_DEG: f64 = 0.01;
const DELAYED_PROBABILITY: f64 = 0.25;

// Tick defaults
const TICK_INTERVAL_MS: u64 = 5000;
const MAX_JITTER_DEG: f64 = 0.0005;
const MAX_OCCUPANCY_DELTA: u32 = 3;

const_assert!(MIN_BUSES_PER_ROUTE <= MAX_BUSES_PER_ROUTE);
const_assert!(MIN_INITIAL_OCCUPANCY < MAX_INITIAL_OCCUPANCY);
const_assert!(MAX_INITIAL_OCCUPANCY <= BUS_CAPACITY);
const_assert!(MIN_INITIAL_ETA_MIN >= 1);
const_assert!(MIN_INITIAL_ETA_MIN < MAX_INITIAL_ETA_MIN);
const_assert!(MIN_SPEED_KMH < MAX_SPEED_KMH);
const_assert!(TICK_INTERVAL_MS > 0);

/// Shape of the fleet produced by one generation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub min_buses_per_route: u32,
    pub max_buses_per_route: u32,
    pub bus_capacity: u32,
    pub min_initial_occupancy: u32,
    /// Exclusive upper bound.
    pub max_initial_occupancy: u32,
    pub min_initial_eta_min: u32,
    /// Exclusive upper bound.
    pub max_initial_eta_min: u32,
    pub min_speed_kmh: u32,
    /// Exclusive upper bound.
    pub max_speed_kmh: u32,
    /// Full width of the square a bus may spawn in around its stop, in degrees.
    pub spawn_offset_deg: f64,
    pub delayed_probability: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_buses_per_route: MIN_BUSES_PER_ROUTE,
            max_buses_per_route: MAX_BUSES_PER_ROUTE,
            bus_capacity: BUS_CAPACITY,
            min_initial_occupancy: MIN_INITIAL_OCCUPANCY,
            max_initial_occupancy: MAX_INITIAL_OCCUPANCY,
            min_initial_eta_min: MIN_INITIAL_ETA_MIN,
            max_initial_eta_min: MAX_INITIAL_ETA_MIN,
            min_speed_kmh: MIN_SPEED_KMH,
            max_speed_kmh: MAX_SPEED_KMH,
            spawn_offset_deg: SPAWN_OFFSET_DEG,
            delayed_probability: DELAYED_PROBABILITY,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_buses_per_route > self.max_buses_per_route {
            return Err(invalid("min_buses_per_route exceeds max_buses_per_route"));
        }
        if self.bus_capacity == 0 {
            return Err(invalid("bus_capacity must be positive"));
        }
        if self.min_initial_occupancy >= self.max_initial_occupancy {
            return Err(invalid("initial occupancy range is empty"));
        }
        if self.min_initial_occupancy > self.bus_capacity {
            return Err(invalid("min_initial_occupancy exceeds bus_capacity"));
        }
        if self.min_initial_eta_min == 0 || self.min_initial_eta_min >= self.max_initial_eta_min {
            return Err(invalid("initial ETA range must be non-empty and start at 1 or more"));
        }
        if self.min_speed_kmh >= self.max_speed_kmh {
            return Err(invalid("speed range is empty"));
        }
        if !(self.spawn_offset_deg >= 0.0 && self.spawn_offset_deg.is_finite()) {
            return Err(invalid("spawn_offset_deg must be a non-negative number"));
        }
        if !(0.0..=1.0).contains(&self.delayed_probability) {
            return Err(invalid("delayed_probability must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Cadence and noise of the tick engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_interval_ms: u64,
    pub max_jitter_deg: f64,
    pub max_occupancy_delta: u32,
    /// Fixed seed for reproducible runs; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
            max_jitter_deg: MAX_JITTER_DEG,
            max_occupancy_delta: MAX_OCCUPANCY_DELTA,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms must be positive"));
        }
        if !(self.max_jitter_deg >= 0.0 && self.max_jitter_deg.is_finite()) {
            return Err(invalid("max_jitter_deg must be a non-negative number"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub generation: GenerationConfig,
    pub simulation: SimulationConfig,
    pub provider: ProviderKind,
}

impl FleetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.generation.validate()?;
        self.simulation.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.generation.bus_capacity, 40);
        assert_eq!(config.provider, ProviderKind::StraightLine { average_speed_kmh: None });
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = FleetConfig::from_json_str(
            r#"{ "simulation": { "tick_interval_ms": 1000, "seed": 9 } }"#,
        )
        .unwrap();
        assert_eq!(config.simulation.tick_interval_ms, 1000);
        assert_eq!(config.simulation.seed, Some(9));
        assert_eq!(config.simulation.max_occupancy_delta, 3);
        assert_eq!(config.generation, GenerationConfig::default());
    }

    #[test]
    fn test_rejects_inverted_bus_range() {
        let mut config = FleetConfig::default();
        config.generation.min_buses_per_route = 4;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = FleetConfig::from_json_str(r#"{ "simulation": { "tick_interval_ms": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_negative_jitter() {
        let mut config = SimulationConfig::default();
        config.max_jitter_deg = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_minimum_eta() {
        let mut config = GenerationConfig::default();
        config.min_initial_eta_min = 0;
        assert!(config.validate().is_err());
    }
}
