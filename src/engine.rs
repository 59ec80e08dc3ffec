//! Simulation tick engine.
//!
//! Two states: idle and running. `start` runs one tick immediately, then a
//! tokio task ticks the fleet every `tick_interval`. Each tick drifts every
//! bus (position jitter, ETA +-1, occupancy churn), publishes the new fleet
//! atomically through the [`FleetStore`] and hands the published snapshot to
//! the update callback.
//!
//! Ticks are serialized by a pass lock, so callbacks are delivered in tick
//! order and never overlap. `stop` is idempotent and may be called from inside
//! the callback. So may `start`: its immediate tick is then handed to the new
//! timer task and runs once the current tick has finished. The callback must
//! not call `tick_now`/`tick_at` itself.

use crate::catalog::RouteCatalog;
use crate::config::SimulationConfig;
use crate::fleet::{Bus, FleetSnapshot, FleetStore, TickReport};
use crate::rng::SimRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub type UpdateCallback = Arc<dyn Fn(&FleetSnapshot) + Send + Sync>;

thread_local! {
    // Set while this thread is inside an update callback, i.e. holds the pass lock.
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

struct CallbackScope {
    outer: bool,
}

impl CallbackScope {
    fn enter() -> Self {
        Self { outer: IN_CALLBACK.with(|flag| flag.replace(true)) }
    }

    fn active() -> bool {
        IN_CALLBACK.with(Cell::get)
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        IN_CALLBACK.with(|flag| flag.set(self.outer));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    Running,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("tick engine must be started from within a tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the timer task is busy ticking
        self.notify.notify_one();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Control {
    signal: Option<Arc<StopSignal>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<FleetStore>,
    config: SimulationConfig,
    rng: Mutex<SimRng>,
    callback: Mutex<Option<UpdateCallback>>,
    control: Mutex<Control>,
    pass: Mutex<()>,
    tick_count: AtomicU64,
}

/// Cheap-to-clone handle; all clones drive the same engine.
#[derive(Clone)]
pub struct TickEngine {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for TickEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickEngine")
            .field("state", &self.state())
            .field("tick_count", &self.tick_count())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl TickEngine {
    pub fn new(store: Arc<FleetStore>, config: SimulationConfig, rng: SimRng) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                rng: Mutex::new(rng),
                callback: Mutex::new(None),
                control: Mutex::new(Control::default()),
                pass: Mutex::new(()),
                tick_count: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<FleetStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.inner.config
    }

    /// Replace the update callback. Takes effect from the next tick.
    pub fn set_update_callback<F>(&self, callback: F)
    where
        F: Fn(&FleetSnapshot) + Send + Sync + 'static,
    {
        *lock(&self.inner.callback) = Some(Arc::new(callback));
    }

    pub fn clear_update_callback(&self) {
        *lock(&self.inner.callback) = None;
    }

    pub fn state(&self) -> EngineState {
        if lock(&self.inner.control).signal.is_some() {
            EngineState::Running
        } else {
            EngineState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Number of ticks applied since construction.
    pub fn tick_count(&self) -> u64 {
        self.inner.tick_count.load(Ordering::Relaxed)
    }

    /// Idle -> running. Ticks once before returning, then arms the timer.
    ///
    /// Called from the update callback, the first tick cannot run here and is
    /// left to the timer task instead, which fires it right away.
    ///
    /// Returns `Ok(false)` if the engine was already running.
    pub fn start(&self) -> Result<bool, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let signal = {
            let mut control = lock(&self.inner.control);
            if control.signal.is_some() {
                return Ok(false);
            }
            let signal = Arc::new(StopSignal::default());
            control.signal = Some(Arc::clone(&signal));
            signal
        };

        let period = self.inner.config.tick_interval();
        info!(interval_ms = self.inner.config.tick_interval_ms, "Tick engine starting");

        let first_tick = if CallbackScope::active() {
            debug!("Started from the update callback, deferring the first tick");
            Instant::now()
        } else {
            self.tick_guarded(&signal);
            if signal.is_stopped() {
                // stopped from inside the first callback
                return Ok(true);
            }
            Instant::now() + period
        };

        let task = runtime.spawn(run_timer(
            Arc::downgrade(&self.inner),
            Arc::clone(&signal),
            first_tick,
            period,
        ));

        let mut control = lock(&self.inner.control);
        let still_current = control
            .signal
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &signal));
        // Otherwise stopped (and maybe restarted) meanwhile; the task sees its own signal and exits.
        if still_current {
            control.task = Some(task);
        }
        Ok(true)
    }

    /// Running -> idle. No tick fires after this returns; a pass already in
    /// progress completes. Returns `false` if the engine was already idle.
    pub fn stop(&self) -> bool {
        let (signal, task) = {
            let mut control = lock(&self.inner.control);
            (control.signal.take(), control.task.take())
        };

        match signal {
            Some(signal) => {
                signal.stop();
                drop(task);
                info!(ticks = self.tick_count(), "Tick engine stopped");
                true
            }
            None => false,
        }
    }

    /// Stop and wait for the timer task to exit. Must not be called from the update callback.
    pub async fn shutdown(&self) {
        let task = {
            let mut control = lock(&self.inner.control);
            if let Some(signal) = control.signal.take() {
                signal.stop();
            }
            control.task.take()
        };

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Tick timer task ended abnormally: {}", e);
            }
            info!(ticks = self.tick_count(), "Tick engine shut down");
        }
    }

    /// Apply one tick stamped with the wall clock.
    pub fn tick_now(&self) -> TickReport {
        self.tick_at(now_ms())
    }

    /// Apply one tick stamped with `timestamp_ms` and notify the callback.
    pub fn tick_at(&self, timestamp_ms: u64) -> TickReport {
        let _pass = lock(&self.inner.pass);
        self.run_pass(timestamp_ms)
    }

    // Timer-driven tick: re-checks the stop signal under the pass lock.
    fn tick_guarded(&self, signal: &StopSignal) -> Option<TickReport> {
        let _pass = lock(&self.inner.pass);
        if signal.is_stopped() {
            return None;
        }
        Some(self.run_pass(now_ms()))
    }

    fn run_pass(&self, timestamp_ms: u64) -> TickReport {
        let inner = &self.inner;
        let catalog = Arc::clone(inner.store.catalog());

        let report = {
            let mut rng = lock(&inner.rng);
            inner
                .store
                .apply_tick(|bus| drift_bus(bus, &catalog, &inner.config, &mut rng, timestamp_ms))
        };

        let tick = inner.tick_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            tick,
            updated = report.updated,
            skipped = report.skipped,
            rejected = report.rejected,
            "Tick applied"
        );

        let snapshot = inner.store.snapshot();
        let callback = lock(&inner.callback).clone();
        if let Some(callback) = callback {
            let _scope = CallbackScope::enter();
            callback(&snapshot);
        }
        report
    }
}

async fn run_timer(engine: Weak<Inner>, signal: Arc<StopSignal>, first_tick: Instant, period: Duration) {
    let mut interval = time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = signal.notify.notified() => break,
        }
        if signal.is_stopped() {
            break;
        }
        let Some(inner) = engine.upgrade() else {
            break;
        };
        TickEngine { inner }.tick_guarded(&signal);
    }

    debug!("Tick timer exited");
}

/// One tick's worth of telemetry noise for a single bus.
///
/// Returns `None` (bus left as is) when the bus's route is not in the catalog.
pub(crate) fn drift_bus(
    bus: &Bus,
    catalog: &RouteCatalog,
    config: &SimulationConfig,
    rng: &mut SimRng,
    timestamp_ms: u64,
) -> Option<Bus> {
    if !catalog.contains_route(&bus.route_id) {
        warn!(bus = %bus.id, route = %bus.route_id, "Bus references unknown route, leaving unchanged");
        return None;
    }

    let mut next = bus.clone();
    next.current_lat += rng.symmetric(config.max_jitter_deg);
    next.current_lng += rng.symmetric(config.max_jitter_deg);

    next.eta = if rng.coin() {
        bus.eta.saturating_sub(1).max(1)
    } else {
        bus.eta.saturating_add(1)
    };

    // floor of a uniform draw over [-max, max): -3..=2 for the default of 3
    let max_delta = i64::from(config.max_occupancy_delta);
    let delta = if max_delta == 0 { 0 } else { rng.gen_range(-max_delta..max_delta) };
    let occupancy = (i64::from(bus.occupancy) + delta).clamp(0, i64::from(bus.capacity));
    next.occupancy = u32::try_from(occupancy).unwrap_or(bus.capacity);

    next.last_updated = timestamp_ms.max(bus.last_updated);
    Some(next)
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BusStop, Route};
    use crate::fleet::BusStatus;

    fn bus(route_id: &str, occupancy: u32, eta: u32) -> Bus {
        Bus {
            id: "bus-1-1".into(),
            route_id: route_id.into(),
            current_lat: 40.75,
            current_lng: -73.99,
            heading: 180.0,
            speed: 22.0,
            capacity: 40,
            occupancy,
            next_stop: "Shopping Mall".into(),
            eta,
            status: BusStatus::Delayed,
            last_updated: 10_000,
        }
    }

    #[test]
    fn test_drift_is_bounded() {
        let catalog = RouteCatalog::builtin();
        let config = SimulationConfig::default();
        let mut rng = SimRng::from_seed_u64(5);
        let original = bus("route-1", 20, 10);

        for _ in 0..500 {
            let next = drift_bus(&original, &catalog, &config, &mut rng, 20_000).unwrap();
            assert!((next.current_lat - original.current_lat).abs() <= config.max_jitter_deg);
            assert!((next.current_lng - original.current_lng).abs() <= config.max_jitter_deg);
            assert!(next.eta == 9 || next.eta == 11);
            assert!(next.occupancy.abs_diff(original.occupancy) <= 3);
            assert_eq!(next.last_updated, 20_000);
            assert_eq!(next.status, BusStatus::Delayed);
            assert_eq!(next.next_stop, original.next_stop);
            assert_eq!(next.route_id, original.route_id);
        }
    }

    #[test]
    fn test_occupancy_delta_spans_minus_three_to_plus_two() {
        let catalog = RouteCatalog::builtin();
        let config = SimulationConfig::default();
        let original = bus("route-1", 20, 10);

        let mut deltas = std::collections::BTreeSet::new();
        for seed in 0..200 {
            let mut rng = SimRng::from_seed_u64(seed);
            let next = drift_bus(&original, &catalog, &config, &mut rng, 20_000).unwrap();
            deltas.insert(i64::from(next.occupancy) - i64::from(original.occupancy));
        }

        assert_eq!(deltas.into_iter().collect::<Vec<_>>(), vec![-3, -2, -1, 0, 1, 2]);
    }

    #[test]
    fn test_zero_occupancy_delta_keeps_occupancy() {
        let catalog = RouteCatalog::builtin();
        let config = SimulationConfig { max_occupancy_delta: 0, ..SimulationConfig::default() };
        let mut rng = SimRng::from_seed_u64(12);

        for _ in 0..50 {
            let next = drift_bus(&bus("route-1", 17, 5), &catalog, &config, &mut rng, 20_000).unwrap();
            assert_eq!(next.occupancy, 17);
        }
    }

    #[test]
    fn test_drift_clamps_eta_and_occupancy() {
        let catalog = RouteCatalog::builtin();
        let config = SimulationConfig::default();
        let mut rng = SimRng::from_seed_u64(8);

        for _ in 0..500 {
            let low = drift_bus(&bus("route-1", 0, 1), &catalog, &config, &mut rng, 20_000).unwrap();
            assert!(low.eta == 1 || low.eta == 2);
            assert!(low.occupancy <= 2);

            let full = drift_bus(&bus("route-1", 40, 1), &catalog, &config, &mut rng, 20_000).unwrap();
            assert!(full.occupancy >= 37 && full.occupancy <= 40);
        }
    }

    #[test]
    fn test_drift_never_moves_timestamp_backwards() {
        let catalog = RouteCatalog::builtin();
        let mut rng = SimRng::default();
        let next = drift_bus(&bus("route-2", 5, 5), &catalog, &SimulationConfig::default(), &mut rng, 1)
            .unwrap();
        assert_eq!(next.last_updated, 10_000);
    }

    #[test]
    fn test_drift_skips_unknown_route() {
        let other = RouteCatalog::from_routes(vec![Route {
            id: "route-x".into(),
            name: "Elsewhere".into(),
            stops: vec![BusStop {
                id: "stop-x".into(),
                name: "X".into(),
                latitude: 0.0,
                longitude: 0.0,
                address: "x".into(),
            }],
            color: "#FFFFFF".into(),
            total_distance: 1.0,
            estimated_duration: 1,
        }])
        .unwrap();
        let mut rng = SimRng::default();
        assert!(drift_bus(&bus("route-1", 5, 5), &other, &SimulationConfig::default(), &mut rng, 1).is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let store = Arc::new(
            FleetStore::new(Arc::new(RouteCatalog::builtin()), vec![bus("route-1", 5, 5)]).unwrap(),
        );
        let engine = TickEngine::new(store, SimulationConfig::default(), SimRng::default());
        assert_eq!(engine.start(), Err(EngineError::NoRuntime));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.tick_count(), 0);
    }

    #[test]
    fn test_manual_ticks_are_counted() {
        let store = Arc::new(
            FleetStore::new(Arc::new(RouteCatalog::builtin()), vec![bus("route-1", 5, 5)]).unwrap(),
        );
        let engine = TickEngine::new(Arc::clone(&store), SimulationConfig::default(), SimRng::default());
        let report = engine.tick_at(50_000);
        assert_eq!(report, TickReport { updated: 1, skipped: 0, rejected: 0 });
        assert_eq!(engine.tick_count(), 1);
        assert_eq!(store.snapshot()[0].last_updated, 50_000);
    }
}
