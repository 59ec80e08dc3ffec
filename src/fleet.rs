//! Fleet state: the bus model, one-shot fleet generation and the store that
//! publishes consistent snapshots while the tick engine mutates it.

use crate::catalog::{ConfigError, RouteCatalog};
use crate::config::GenerationConfig;
use crate::rng::SimRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusStatus {
    Active,
    Delayed,
    Maintenance,
    OffDuty,
}

impl BusStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BusStatus::Active => "active",
            BusStatus::Delayed => "delayed",
            BusStatus::Maintenance => "maintenance",
            BusStatus::OffDuty => "off-duty",
        }
    }
}

impl core::fmt::Display for BusStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: String,
    pub route_id: String,
    pub current_lat: f64,
    pub current_lng: f64,
    /// Degrees, `[0, 360)`.
    pub heading: f64,
    /// km/h
    pub speed: f64,
    pub capacity: u32,
    pub occupancy: u32,
    /// Display name of the next stop.
    pub next_stop: String,
    /// Minutes to the next stop, never below 1.
    pub eta: u32,
    pub status: BusStatus,
    /// Unix epoch milliseconds.
    pub last_updated: u64,
}

impl Bus {
    pub fn occupancy_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        f64::from(self.occupancy) / f64::from(self.capacity) * 100.0
    }

    /// Check the bounds every bus must satisfy on its own.
    pub fn check_bounds(&self, catalog: &RouteCatalog) -> Result<(), InvariantError> {
        if self.capacity == 0 {
            return Err(InvariantError::ZeroCapacity { bus_id: self.id.clone() });
        }
        if self.occupancy > self.capacity {
            return Err(InvariantError::OccupancyOutOfBounds {
                bus_id: self.id.clone(),
                occupancy: self.occupancy,
                capacity: self.capacity,
            });
        }
        if self.eta < 1 {
            return Err(InvariantError::EtaBelowMinimum { bus_id: self.id.clone(), eta: self.eta });
        }
        if !(self.speed >= 0.0 && self.speed.is_finite()) {
            return Err(InvariantError::InvalidMotion { bus_id: self.id.clone() });
        }
        if !(0.0..360.0).contains(&self.heading) {
            return Err(InvariantError::InvalidMotion { bus_id: self.id.clone() });
        }
        if !(self.current_lat.is_finite() && self.current_lng.is_finite()) {
            return Err(InvariantError::InvalidMotion { bus_id: self.id.clone() });
        }
        if !catalog.contains_route(&self.route_id) {
            return Err(InvariantError::DanglingRoute {
                bus_id: self.id.clone(),
                route_id: self.route_id.clone(),
            });
        }
        Ok(())
    }

    /// Check that `next` is an acceptable successor state of `self`.
    pub fn check_transition(&self, next: &Bus, catalog: &RouteCatalog) -> Result<(), InvariantError> {
        if next.id != self.id || next.route_id != self.route_id || next.capacity != self.capacity {
            return Err(InvariantError::IdentityChanged { bus_id: self.id.clone() });
        }
        if next.last_updated < self.last_updated {
            return Err(InvariantError::TimestampRegressed {
                bus_id: self.id.clone(),
                previous: self.last_updated,
                proposed: next.last_updated,
            });
        }
        next.check_bounds(catalog)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("bus {bus_id}: occupancy {occupancy} outside [0, {capacity}]")]
    OccupancyOutOfBounds { bus_id: String, occupancy: u32, capacity: u32 },
    #[error("bus {bus_id}: eta {eta} below 1 minute")]
    EtaBelowMinimum { bus_id: String, eta: u32 },
    #[error("bus {bus_id}: capacity must be positive")]
    ZeroCapacity { bus_id: String },
    #[error("bus {bus_id}: route '{route_id}' is not in the catalog")]
    DanglingRoute { bus_id: String, route_id: String },
    #[error("bus {bus_id}: last-updated went backwards ({previous} -> {proposed})")]
    TimestampRegressed { bus_id: String, previous: u64, proposed: u64 },
    #[error("bus {bus_id}: id, route or capacity changed by a tick")]
    IdentityChanged { bus_id: String },
    #[error("bus {bus_id}: heading, speed or position out of range")]
    InvalidMotion { bus_id: String },
    #[error("duplicate bus id '{0}'")]
    DuplicateBus(String),
}

/// Create the initial fleet: a bounded random number of buses per route,
/// each parked near a random stop and heading for the stop after it.
///
/// Fails without drawing anything if `config` does not validate.
pub fn generate_initial_fleet(
    catalog: &RouteCatalog,
    config: &GenerationConfig,
    rng: &mut SimRng,
    timestamp_ms: u64,
) -> Result<Vec<Bus>, ConfigError> {
    config.validate()?;

    let mut buses = Vec::new();
    let half_offset = config.spawn_offset_deg / 2.0;

    for (route_index, route) in catalog.routes().iter().enumerate() {
        let bus_count = rng.gen_range(config.min_buses_per_route..=config.max_buses_per_route);

        for i in 0..bus_count {
            let stop_index = rng.gen_range(0..route.stops.len());
            let current_stop = &route.stops[stop_index];
            let next_stop = route.stop_after(stop_index).unwrap_or(current_stop);

            let current_lat = current_stop.latitude + rng.symmetric(half_offset);
            let current_lng = current_stop.longitude + rng.symmetric(half_offset);
            let heading = f64::from(rng.gen_range(0..360_u32));
            let speed = f64::from(rng.gen_range(config.min_speed_kmh..config.max_speed_kmh));
            let occupancy = rng
                .gen_range(config.min_initial_occupancy..config.max_initial_occupancy)
                .min(config.bus_capacity);
            let eta = rng.gen_range(config.min_initial_eta_min..config.max_initial_eta_min);
            let status = if rng.gen_bool(config.delayed_probability) {
                BusStatus::Delayed
            } else {
                BusStatus::Active
            };

            buses.push(Bus {
                id: format!("bus-{}-{}", route_index + 1, i + 1),
                route_id: route.id.clone(),
                current_lat,
                current_lng,
                heading,
                speed,
                capacity: config.bus_capacity,
                occupancy,
                next_stop: next_stop.name.clone(),
                eta,
                status,
                last_updated: timestamp_ms,
            });
        }
    }

    info!(buses = buses.len(), routes = catalog.len(), "Initial fleet generated");
    Ok(buses)
}

/// Immutable view of the whole fleet at one instant.
pub type FleetSnapshot = Arc<Vec<Bus>>;

/// Outcome of one mutation pass over the fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub updated: u32,
    pub skipped: u32,
    pub rejected: u32,
}

/// Owner of every bus. Readers get cheap `Arc` snapshots; a mutation pass
/// builds a working copy and swaps it in as a whole.
#[derive(Debug)]
pub struct FleetStore {
    catalog: Arc<RouteCatalog>,
    current: RwLock<FleetSnapshot>,
    writer: Mutex<()>,
}

impl FleetStore {
    /// Wrap a seed fleet after checking every bus against the catalog.
    pub fn new(catalog: Arc<RouteCatalog>, buses: Vec<Bus>) -> Result<Self, InvariantError> {
        let mut ids = HashSet::new();
        for bus in &buses {
            if !ids.insert(bus.id.as_str()) {
                return Err(InvariantError::DuplicateBus(bus.id.clone()));
            }
            bus.check_bounds(&catalog)?;
        }

        Ok(Self {
            catalog,
            current: RwLock::new(Arc::new(buses)),
            writer: Mutex::new(()),
        })
    }

    pub fn catalog(&self) -> &Arc<RouteCatalog> {
        &self.catalog
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn find_bus(&self, bus_id: &str) -> Option<Bus> {
        self.snapshot().iter().find(|bus| bus.id == bus_id).cloned()
    }

    pub fn buses_on_route(&self, route_id: &str) -> Vec<Bus> {
        self.snapshot()
            .iter()
            .filter(|bus| bus.route_id == route_id)
            .cloned()
            .collect()
    }

    /// Commuter search: buses whose id, route name or next stop contains
    /// `query`, ignoring case, optionally narrowed to one route.
    ///
    /// An empty query matches every bus.
    pub fn search(&self, query: &str, route_id: Option<&str>) -> Vec<Bus> {
        let needle = query.to_lowercase();
        let contains = |haystack: &str| haystack.to_lowercase().contains(&needle);

        self.snapshot()
            .iter()
            .filter(|bus| route_id.is_none() || route_id == Some(bus.route_id.as_str()))
            .filter(|bus| {
                needle.is_empty()
                    || contains(&bus.id)
                    || self
                        .catalog
                        .find_route(&bus.route_id)
                        .is_some_and(|route| contains(&route.name))
                    || contains(&bus.next_stop)
            })
            .cloned()
            .collect()
    }

    /// Run `mutate` over every bus and publish the result atomically.
    ///
    /// `mutate` returns `None` to leave a bus untouched. A proposed bus that
    /// fails validation is dropped and the previous state is kept.
    pub(crate) fn apply_tick<F>(&self, mut mutate: F) -> TickReport
    where
        F: FnMut(&Bus) -> Option<Bus>,
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.snapshot();
        let mut report = TickReport::default();

        let next: Vec<Bus> = previous
            .iter()
            .map(|bus| match mutate(bus) {
                None => {
                    report.skipped += 1;
                    bus.clone()
                }
                Some(proposed) => match bus.check_transition(&proposed, &self.catalog) {
                    Ok(()) => {
                        report.updated += 1;
                        proposed
                    }
                    Err(e) => {
                        warn!("Rejected tick update: {}", e);
                        report.rejected += 1;
                        bus.clone()
                    }
                },
            })
            .collect();

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bus(id: &str, route_id: &str) -> Bus {
        Bus {
            id: id.into(),
            route_id: route_id.into(),
            current_lat: 40.7128,
            current_lng: -74.0060,
            heading: 90.0,
            speed: 20.0,
            capacity: 40,
            occupancy: 10,
            next_stop: "Business District".into(),
            eta: 5,
            status: BusStatus::Active,
            last_updated: 1_000,
        }
    }

    fn store_with(buses: Vec<Bus>) -> FleetStore {
        FleetStore::new(Arc::new(RouteCatalog::builtin()), buses).unwrap()
    }

    #[test]
    fn test_generation_respects_bounds() {
        let catalog = RouteCatalog::builtin();
        let config = GenerationConfig::default();

        for seed in 0..20 {
            let mut rng = SimRng::from_seed_u64(seed);
            let buses = generate_initial_fleet(&catalog, &config, &mut rng, 5_000).unwrap();

            for route in catalog.routes() {
                let count = buses.iter().filter(|b| b.route_id == route.id).count();
                assert!((2..=3).contains(&count), "route {} got {} buses", route.id, count);
            }
            for bus in &buses {
                assert!(bus.check_bounds(&catalog).is_ok());
                assert_eq!(bus.capacity, 40);
                assert!((5..40).contains(&bus.occupancy));
                assert!((3..23).contains(&bus.eta));
                assert!((10.0..40.0).contains(&bus.speed));
                assert!(matches!(bus.status, BusStatus::Active | BusStatus::Delayed));
                assert_eq!(bus.last_updated, 5_000);
            }
        }
    }

    #[test]
    fn test_generation_places_bus_near_stop_before_next_stop() {
        let catalog = RouteCatalog::builtin();
        let mut rng = SimRng::from_seed_u64(3);
        let buses = generate_initial_fleet(&catalog, &GenerationConfig::default(), &mut rng, 0).unwrap();

        for bus in &buses {
            let route = catalog.find_route(&bus.route_id).unwrap();
            let next_index = route.stops.iter().position(|s| s.name == bus.next_stop).unwrap();
            let current_index = (next_index + route.stops.len() - 1) % route.stops.len();
            let origin = &route.stops[current_index];
            assert!((bus.current_lat - origin.latitude).abs() <= 0.005);
            assert!((bus.current_lng - origin.longitude).abs() <= 0.005);
        }
    }

    #[test]
    fn test_generation_ids_follow_route_order() {
        let catalog = RouteCatalog::builtin();
        let mut rng = SimRng::from_seed_u64(11);
        let buses = generate_initial_fleet(&catalog, &GenerationConfig::default(), &mut rng, 0).unwrap();
        assert_eq!(buses[0].id, "bus-1-1");
        assert_eq!(buses[0].route_id, "route-1");
        assert_eq!(buses.last().unwrap().route_id, "route-2");
    }

    #[test]
    fn test_generation_is_reproducible() {
        let catalog = RouteCatalog::builtin();
        let config = GenerationConfig::default();
        let a = generate_initial_fleet(&catalog, &config, &mut SimRng::from_seed_u64(99), 0).unwrap();
        let b = generate_initial_fleet(&catalog, &config, &mut SimRng::from_seed_u64(99), 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_generation_rejects_empty_ranges() {
        let catalog = RouteCatalog::builtin();
        let mut rng = SimRng::from_seed_u64(1);

        let flat_speed = GenerationConfig { min_speed_kmh: 20, max_speed_kmh: 20, ..Default::default() };
        let result = generate_initial_fleet(&catalog, &flat_speed, &mut rng, 0);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let inverted = GenerationConfig {
            min_initial_occupancy: 30,
            max_initial_occupancy: 10,
            ..Default::default()
        };
        let result = generate_initial_fleet(&catalog, &inverted, &mut rng, 0);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let too_few = GenerationConfig { min_buses_per_route: 4, max_buses_per_route: 2, ..Default::default() };
        assert!(generate_initial_fleet(&catalog, &too_few, &mut rng, 0).is_err());
    }

    #[test]
    fn test_store_rejects_dangling_seed_bus() {
        let result = FleetStore::new(
            Arc::new(RouteCatalog::builtin()),
            vec![sample_bus("bus-x", "route-404")],
        );
        assert!(matches!(result, Err(InvariantError::DanglingRoute { .. })));
    }

    #[test]
    fn test_store_rejects_duplicate_bus_id() {
        let result = FleetStore::new(
            Arc::new(RouteCatalog::builtin()),
            vec![sample_bus("bus-1", "route-1"), sample_bus("bus-1", "route-2")],
        );
        assert_eq!(result.unwrap_err(), InvariantError::DuplicateBus("bus-1".into()));
    }

    #[test]
    fn test_apply_tick_rejects_invalid_and_keeps_prior_state() {
        let store = store_with(vec![sample_bus("bus-1", "route-1"), sample_bus("bus-2", "route-1")]);

        let report = store.apply_tick(|bus| {
            let mut next = bus.clone();
            next.last_updated += 10;
            if bus.id == "bus-1" {
                next.occupancy = 41;
            } else {
                next.occupancy = 12;
            }
            Some(next)
        });

        assert_eq!(report, TickReport { updated: 1, skipped: 0, rejected: 1 });
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].occupancy, 10);
        assert_eq!(snapshot[0].last_updated, 1_000);
        assert_eq!(snapshot[1].occupancy, 12);
    }

    #[test]
    fn test_apply_tick_rejects_zero_eta_and_regressed_timestamp() {
        let store = store_with(vec![sample_bus("bus-1", "route-1"), sample_bus("bus-2", "route-2")]);

        let report = store.apply_tick(|bus| {
            let mut next = bus.clone();
            if bus.id == "bus-1" {
                next.eta = 0;
            } else {
                next.last_updated = 1;
            }
            Some(next)
        });

        assert_eq!(report.rejected, 2);
        assert!(store.snapshot().iter().all(|b| b.eta == 5 && b.last_updated == 1_000));
    }

    #[test]
    fn test_apply_tick_rejects_route_change() {
        let store = store_with(vec![sample_bus("bus-1", "route-1")]);
        let report = store.apply_tick(|bus| {
            let mut next = bus.clone();
            next.route_id = "route-2".into();
            Some(next)
        });
        assert_eq!(report.rejected, 1);
        assert_eq!(store.snapshot()[0].route_id, "route-1");
    }

    #[test]
    fn test_snapshot_taken_before_tick_is_unchanged() {
        let store = store_with(vec![sample_bus("bus-1", "route-1")]);
        let before = store.snapshot();

        store.apply_tick(|bus| {
            let mut next = bus.clone();
            next.occupancy = 20;
            Some(next)
        });

        assert_eq!(before[0].occupancy, 10);
        assert_eq!(store.snapshot()[0].occupancy, 20);
    }

    #[test]
    fn test_lookups() {
        let store = store_with(vec![
            sample_bus("bus-1", "route-1"),
            sample_bus("bus-2", "route-2"),
            sample_bus("bus-3", "route-1"),
        ]);
        assert_eq!(store.find_bus("bus-2").map(|b| b.route_id), Some("route-2".to_string()));
        assert!(store.find_bus("bus-9").is_none());
        assert_eq!(store.buses_on_route("route-1").len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let mut on_loop = sample_bus("bus-2-1", "route-2");
        on_loop.next_stop = "Airport Terminal".into();
        let store = store_with(vec![sample_bus("bus-1-1", "route-1"), on_loop, sample_bus("bus-1-2", "route-1")]);

        let ids = |buses: Vec<Bus>| buses.into_iter().map(|b| b.id).collect::<Vec<_>>();

        // bus id
        assert_eq!(ids(store.search("BUS-2", None)), vec!["bus-2-1"]);
        // route name resolved through the catalog
        assert_eq!(ids(store.search("downtown", None)), vec!["bus-1-1", "bus-1-2"]);
        assert_eq!(ids(store.search("SUBURBAN loop", None)), vec!["bus-2-1"]);
        // next stop
        assert_eq!(ids(store.search("airPORT", None)), vec!["bus-2-1"]);
        assert!(store.search("harbour", None).is_empty());
    }

    #[test]
    fn test_search_empty_query_matches_every_bus() {
        let store = store_with(vec![
            sample_bus("bus-1-1", "route-1"),
            sample_bus("bus-2-1", "route-2"),
            sample_bus("bus-1-2", "route-1"),
        ]);

        assert_eq!(store.search("", None).len(), 3);
        assert_eq!(store.search("", Some("route-1")).len(), 2);
        assert!(store.search("", Some("route-9")).is_empty());
    }

    #[test]
    fn test_search_narrowed_to_route() {
        let store = store_with(vec![sample_bus("bus-1-1", "route-1"), sample_bus("bus-2-1", "route-2")]);

        // both share next stop "Business District"
        assert_eq!(store.search("business", None).len(), 2);
        let narrowed = store.search("business", Some("route-2"));
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].id, "bus-2-1");
    }

    #[test]
    fn test_bus_serializes_camel_case() {
        let mut bus = sample_bus("bus-1", "route-1");
        bus.status = BusStatus::OffDuty;
        let json = serde_json::to_value(&bus).unwrap();
        assert_eq!(json["routeId"], "route-1");
        assert_eq!(json["nextStop"], "Business District");
        assert_eq!(json["status"], "off-duty");
        assert_eq!(json["lastUpdated"], 1_000);
    }

    #[test]
    fn test_occupancy_percent() {
        let mut bus = sample_bus("bus-1", "route-1");
        bus.occupancy = 30;
        assert!((bus.occupancy_percent() - 75.0).abs() < f64::EPSILON);
    }
}
