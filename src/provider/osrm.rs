use super::{Coordinate, EstimationError, ProviderInitError, RoutingProvider};
use crate::eta::{EtaResult, Measure};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes via an OSRM HTTP endpoint (`/route/v1/driving`).
#[derive(Debug)]
pub struct OsrmProvider {
    client: Client,
    endpoint: String,
    ready: OnceCell<()>,
}

impl OsrmProvider {
    /// Create a provider for the given endpoint (e.g. `http://localhost:5000`).
    pub fn new(endpoint: &str) -> Result<Self, ProviderInitError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Url::parse(&endpoint)
            .map_err(|e| ProviderInitError::Misconfigured(format!("invalid OSRM endpoint: {e}")))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderInitError::Misconfigured(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            ready: OnceCell::new(),
        })
    }

    fn route_url(&self, origin: Coordinate, destination: Coordinate) -> Result<Url, EstimationError> {
        // OSRM takes lng,lat pairs
        let raw = format!(
            "{}/route/v1/driving/{:.6},{:.6};{:.6},{:.6}?overview=false",
            self.endpoint, origin.lng, origin.lat, destination.lng, destination.lat,
        );
        Url::parse(&raw).map_err(|e| EstimationError::Request(format!("failed to build OSRM URL: {e}")))
    }
}

/// Minimal OSRM JSON response structures.
#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    message: Option<String>,
    routes: Option<Vec<OsrmRoute>>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    distance: f64, // metres
    duration: f64, // seconds
}

impl RoutingProvider for OsrmProvider {
    async fn initialize(&self) -> Result<(), ProviderInitError> {
        self.ready
            .get_or_try_init(|| async {
                // Any HTTP answer means the server is up; only transport errors count.
                self.client
                    .get(&self.endpoint)
                    .send()
                    .await
                    .map_err(|e| ProviderInitError::Unreachable(e.to_string()))?;
                info!(endpoint = %self.endpoint, "OSRM routing provider reachable");
                Ok::<(), ProviderInitError>(())
            })
            .await
            .map(|_| ())
    }

    async fn estimate(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<EtaResult, EstimationError> {
        let url = self.route_url(origin, destination)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EstimationError::Request(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(EstimationError::QuotaExceeded);
        }

        let parsed: OsrmResponse = response
            .json()
            .await
            .map_err(|e| EstimationError::MalformedResponse(e.to_string()))?;
        parse_route_response(parsed)
    }
}

fn parse_route_response(parsed: OsrmResponse) -> Result<EtaResult, EstimationError> {
    match parsed.code.as_str() {
        "Ok" => {}
        "NoRoute" => return Err(EstimationError::NoRoute),
        other => {
            return Err(EstimationError::Request(format!(
                "{}: {}",
                other,
                parsed.message.unwrap_or_default()
            )))
        }
    }

    let route = parsed
        .routes
        .and_then(|routes| routes.into_iter().next())
        .ok_or_else(|| EstimationError::MalformedResponse("no routes in OK response".into()))?;

    Ok(EtaResult {
        distance: Measure::from_metres(route.distance),
        duration: Measure::from_seconds(route.duration),
    })
}
