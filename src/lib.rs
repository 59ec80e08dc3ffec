//! # Bus Fleet Simulator
//!
//! Simulated live positions of transit buses against fixed routes, with
//! fleet analytics and stop ETA estimation.
//!
//! ## Features
//!
//! - **Route catalog**: ordered routes and stops, validated at load
//! - **Fleet state store**: bus invariants checked on every mutation, atomic snapshots
//! - **Tick engine**: fixed-cadence GPS jitter, occupancy churn and ETA drift
//! - **Analytics**: fleet-wide and per-route occupancy and on-time figures
//! - **ETA estimation**: pluggable routing providers (offline or OSRM)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use busfleet::{FleetConfig, FleetService, RouteCatalog, StraightLineProvider};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = FleetService::build(
//!     RouteCatalog::builtin(),
//!     &FleetConfig::default(),
//!     StraightLineProvider::default(),
//! )?;
//!
//! service.engine().set_update_callback(|buses| {
//!     println!("{} buses updated", buses.len());
//! });
//! service.start()?;
//!
//! let analytics = service.analytics();
//! println!("Average occupancy: {}%", analytics.average_occupancy_percent);
//!
//! let bus = service.store().find_bus("bus-1-1").expect("generated");
//! if let Some(eta) = service.estimator().estimate_eta(&bus, "stop-3").await? {
//!     println!("{} away, {}", eta.distance.text, eta.duration.text);
//! }
//! service.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`catalog`] - Routes and stops
//! - [`fleet`] - Bus model, fleet generation and the state store
//! - [`engine`] - Timer-driven simulation ticks
//! - [`analytics`] - Fleet statistics
//! - [`eta`] / [`provider`] - ETA estimation and routing backends
//! - [`service`] / [`protocol`] - Command handling for the TCP simulator

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod analytics;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod eta;
pub mod fleet;
pub mod protocol;
pub mod provider;
pub mod rng;
pub mod service;

// Re-export main public types for convenience
pub use analytics::{compute_analytics, FleetAnalytics, RoutePerformance};
pub use catalog::{BusStop, ConfigError, Route, RouteCatalog};
pub use config::{FleetConfig, GenerationConfig, SimulationConfig};
pub use engine::{EngineError, EngineState, TickEngine};
pub use eta::{EtaError, EtaEstimator, EtaResult, Measure};
pub use fleet::{generate_initial_fleet, Bus, BusStatus, FleetSnapshot, FleetStore, InvariantError, TickReport};
pub use provider::{AnyProvider, Coordinate, ProviderKind, RoutingProvider, StraightLineProvider};
pub use rng::SimRng;
pub use service::{FleetService, ServiceError};
