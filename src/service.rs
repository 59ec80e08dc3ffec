use crate::analytics::{compute_analytics, FleetAnalytics};
use crate::catalog::{ConfigError, RouteCatalog};
use crate::config::FleetConfig;
use crate::engine::{now_ms, EngineError, TickEngine};
use crate::eta::EtaEstimator;
use crate::fleet::{generate_initial_fleet, FleetStore, InvariantError};
use crate::protocol::{Command, CommandResponse, CommandType, ProtocolHandler, ResponseStatus};
use crate::provider::{ProviderInitError, RoutingProvider};
use crate::rng::SimRng;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid seed fleet: {0}")]
    Invariant(#[from] InvariantError),
    #[error("routing provider error: {0}")]
    Provider(#[from] ProviderInitError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Wires catalog, fleet store, tick engine and ETA estimator together and
/// answers protocol commands against them.
#[derive(Debug)]
pub struct FleetService<P> {
    catalog: Arc<RouteCatalog>,
    store: Arc<FleetStore>,
    engine: TickEngine,
    estimator: EtaEstimator<P>,
    responses: ProtocolHandler,
}

impl<P: RoutingProvider> FleetService<P> {
    /// Generate a fresh fleet for `catalog` according to `config`.
    pub fn build(catalog: RouteCatalog, config: &FleetConfig, provider: P) -> Result<Self, ServiceError> {
        config.validate()?;

        let mut rng = match config.simulation.seed {
            Some(seed) => SimRng::from_seed_u64(seed),
            None => SimRng::from_entropy(),
        };

        let catalog = Arc::new(catalog);
        let buses = generate_initial_fleet(&catalog, &config.generation, &mut rng, now_ms())?;
        let store = Arc::new(FleetStore::new(Arc::clone(&catalog), buses)?);
        let engine = TickEngine::new(Arc::clone(&store), config.simulation.clone(), rng);

        Ok(Self::from_parts(engine, provider))
    }

    /// Assemble a service around an existing engine (and the store it drives).
    pub fn from_parts(engine: TickEngine, provider: P) -> Self {
        let store = Arc::clone(engine.store());
        let catalog = Arc::clone(store.catalog());
        let estimator = EtaEstimator::new(Arc::clone(&catalog), Arc::new(provider));

        Self {
            catalog,
            store,
            engine,
            estimator,
            responses: ProtocolHandler::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<RouteCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<FleetStore> {
        &self.store
    }

    pub fn engine(&self) -> &TickEngine {
        &self.engine
    }

    pub fn estimator(&self) -> &EtaEstimator<P> {
        &self.estimator
    }

    pub fn analytics(&self) -> FleetAnalytics {
        compute_analytics(&self.store.snapshot(), self.catalog.routes())
    }

    pub fn start(&self) -> Result<bool, ServiceError> {
        let started = self.engine.start()?;
        if started {
            info!(buses = self.store.len(), routes = self.catalog.len(), "Fleet simulation running");
        }
        Ok(started)
    }

    pub fn stop(&self) -> bool {
        self.engine.stop()
    }

    pub async fn handle_command(&self, command: Command) -> CommandResponse {
        let id = command.id;
        match command.command_type {
            CommandType::Ping => {
                self.responses.create_response(id, ResponseStatus::Success, Some("pong"), None)
            }
            CommandType::ListRoutes => self.payload(id, self.catalog.routes()),
            CommandType::FleetSnapshot => self.payload(id, &*self.store.snapshot()),
            CommandType::RouteBuses { route_id } => {
                if self.catalog.contains_route(&route_id) {
                    self.payload(id, &self.store.buses_on_route(&route_id))
                } else {
                    self.not_found(id, &format!("Unknown route '{route_id}'"))
                }
            }
            CommandType::SearchBuses { query, route_id } => match route_id {
                Some(route_id) if !self.catalog.contains_route(&route_id) => {
                    self.not_found(id, &format!("Unknown route '{route_id}'"))
                }
                route_id => self.payload(id, &self.store.search(&query, route_id.as_deref())),
            },
            CommandType::FleetAnalytics => self.payload(id, &self.analytics()),
            CommandType::EstimateEta { bus_id, stop_id } => {
                let Some(bus) = self.store.find_bus(&bus_id) else {
                    return self.not_found(id, &format!("Unknown bus '{bus_id}'"));
                };
                match self.estimator.estimate_eta(&bus, &stop_id).await {
                    Ok(Some(eta)) => self.payload(id, &eta),
                    Ok(None) => self.not_found(
                        id,
                        &format!("No estimate available: stop '{stop_id}' is not on {}", bus.route_id),
                    ),
                    Err(e) => self.responses.create_response(
                        id,
                        ResponseStatus::Error,
                        Some(&format!("No estimate available: {e}")),
                        None,
                    ),
                }
            }
            CommandType::Subscribe => {
                self.responses.create_response(id, ResponseStatus::Success, Some("subscribed"), None)
            }
        }
    }

    fn payload<T: Serialize + ?Sized>(&self, id: u32, payload: &T) -> CommandResponse {
        self.responses
            .create_payload_response(id, payload)
            .unwrap_or_else(|e| {
                warn!("Failed to encode response payload: {}", e);
                self.responses.create_error_response(id, &e)
            })
    }

    fn not_found(&self, id: u32, message: &str) -> CommandResponse {
        self.responses.create_response(id, ResponseStatus::NotFound, Some(message), None)
    }
}
