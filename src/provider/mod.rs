//! Pluggable routing providers used by the ETA estimator.
//!
//! Two implementations, selectable via [`ProviderKind`]:
//!
//! - **`StraightLineProvider`**: great-circle distance at a fixed average
//!   speed. Deterministic and offline, the default.
//! - **`OsrmProvider`** (feature `osrm`): calls an OSRM HTTP endpoint.
//!
//! [`AnyProvider`] wraps whichever one the configuration selects so the rest
//! of the crate can stay generic over a single concrete type.

pub mod straight_line;
#[cfg(feature = "osrm")]
pub mod osrm;

pub use straight_line::StraightLineProvider;
#[cfg(feature = "osrm")]
pub use osrm::OsrmProvider;

use crate::eta::EtaResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderInitError {
    #[error("routing provider unreachable: {0}")]
    Unreachable(String),
    #[error("routing provider misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EstimationError {
    #[error("routing request failed: {0}")]
    Request(String),
    #[error("routing quota exceeded")]
    QuotaExceeded,
    #[error("malformed routing response: {0}")]
    MalformedResponse(String),
    #[error("no route between origin and destination")]
    NoRoute,
}

/// A routing backend. `initialize` must be idempotent: once it has succeeded,
/// further calls return `Ok(())` without doing any work.
pub trait RoutingProvider: Send + Sync {
    fn initialize(&self) -> impl Future<Output = Result<(), ProviderInitError>> + Send;

    fn estimate(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> impl Future<Output = Result<EtaResult, EstimationError>> + Send;
}

/// Which routing backend to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderKind {
    StraightLine {
        #[serde(default)]
        average_speed_kmh: Option<f64>,
    },
    /// OSRM HTTP endpoint (e.g. `"http://localhost:5000"`).
    #[cfg(feature = "osrm")]
    Osrm { endpoint: String },
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::StraightLine { average_speed_kmh: None }
    }
}

#[derive(Debug)]
pub enum AnyProvider {
    StraightLine(StraightLineProvider),
    #[cfg(feature = "osrm")]
    Osrm(OsrmProvider),
}

impl AnyProvider {
    pub fn from_kind(kind: &ProviderKind) -> Result<Self, ProviderInitError> {
        match kind {
            ProviderKind::StraightLine { average_speed_kmh } => {
                let provider = match average_speed_kmh {
                    Some(speed) => StraightLineProvider::with_average_speed(*speed)?,
                    None => StraightLineProvider::default(),
                };
                Ok(AnyProvider::StraightLine(provider))
            }
            #[cfg(feature = "osrm")]
            ProviderKind::Osrm { endpoint } => Ok(AnyProvider::Osrm(OsrmProvider::new(endpoint)?)),
        }
    }
}

impl RoutingProvider for AnyProvider {
    async fn initialize(&self) -> Result<(), ProviderInitError> {
        match self {
            AnyProvider::StraightLine(p) => p.initialize().await,
            #[cfg(feature = "osrm")]
            AnyProvider::Osrm(p) => p.initialize().await,
        }
    }

    async fn estimate(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<EtaResult, EstimationError> {
        match self {
            AnyProvider::StraightLine(p) => p.estimate(origin, destination).await,
            #[cfg(feature = "osrm")]
            AnyProvider::Osrm(p) => p.estimate(origin, destination).await,
        }
    }
}
