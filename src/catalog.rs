use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStop {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub name: String,
    pub stops: Vec<BusStop>,
    pub color: String,
    /// Kilometres end to end.
    pub total_distance: f64,
    /// Minutes end to end.
    pub estimated_duration: u32,
}

impl Route {
    pub fn find_stop(&self, stop_id: &str) -> Option<&BusStop> {
        self.stops.iter().find(|stop| stop.id == stop_id)
    }

    /// Stop following `index` in traversal order, wrapping after the last stop.
    pub fn stop_after(&self, index: usize) -> Option<&BusStop> {
        if self.stops.is_empty() {
            return None;
        }
        self.stops.get((index + 1) % self.stops.len())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("route catalog is empty")]
    EmptyCatalog,
    #[error("route '{0}' has no stops")]
    RouteWithoutStops(String),
    #[error("duplicate route id '{0}'")]
    DuplicateRoute(String),
    #[error("duplicate stop id '{stop_id}' in route '{route_id}'")]
    DuplicateStop { route_id: String, stop_id: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration file: {0}")]
    Io(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Immutable, ordered set of routes. Built once per session and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RouteCatalog {
    routes: Vec<Route>,
}

impl RouteCatalog {
    /// Validate and wrap a list of routes. Either the whole catalog is valid or nothing is returned.
    pub fn from_routes(routes: Vec<Route>) -> Result<Self, ConfigError> {
        if routes.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut route_ids = HashSet::new();
        let mut stop_ids = HashSet::new();
        for route in &routes {
            if !route_ids.insert(route.id.as_str()) {
                return Err(ConfigError::DuplicateRoute(route.id.clone()));
            }
            if route.stops.is_empty() {
                return Err(ConfigError::RouteWithoutStops(route.id.clone()));
            }
            for stop in &route.stops {
                if !stop_ids.insert(stop.id.as_str()) {
                    return Err(ConfigError::DuplicateStop {
                        route_id: route.id.clone(),
                        stop_id: stop.id.clone(),
                    });
                }
            }
        }

        info!(routes = routes.len(), stops = stop_ids.len(), "Route catalog loaded");
        Ok(Self { routes })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let routes: Vec<Route> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_routes(routes)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    /// The two-line demonstration network the simulator ships with.
    pub fn builtin() -> Self {
        Self {
            routes: vec![
                Route {
                    id: "route-1".into(),
                    name: "Downtown Express".into(),
                    color: "#1E40AF".into(),
                    total_distance: 15.2,
                    estimated_duration: 45,
                    stops: vec![
                        stop("stop-1", "Central Station", 40.7128, -74.0060, "123 Main St"),
                        stop("stop-2", "Business District", 40.7589, -73.9851, "456 Business Ave"),
                        stop("stop-3", "University Campus", 40.7831, -73.9712, "789 College Rd"),
                        stop("stop-4", "Shopping Mall", 40.7505, -73.9934, "321 Mall Dr"),
                    ],
                },
                Route {
                    id: "route-2".into(),
                    name: "Suburban Loop".into(),
                    color: "#059669".into(),
                    total_distance: 22.8,
                    estimated_duration: 60,
                    stops: vec![
                        stop("stop-5", "Residential Hub", 40.7282, -74.0776, "159 Suburb St"),
                        stop("stop-6", "Community Center", 40.7418, -74.0021, "753 Community Blvd"),
                        stop("stop-7", "Industrial Park", 40.7664, -73.9441, "951 Industrial Way"),
                        stop("stop-8", "Airport Terminal", 40.7769, -73.8740, "147 Airport Rd"),
                    ],
                },
            ],
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn find_route(&self, route_id: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.id == route_id)
    }

    pub fn find_stop(&self, route_id: &str, stop_id: &str) -> Option<&BusStop> {
        self.find_route(route_id)?.find_stop(stop_id)
    }

    pub fn contains_route(&self, route_id: &str) -> bool {
        self.find_route(route_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn stop(id: &str, name: &str, latitude: f64, longitude: f64, address: &str) -> BusStop {
    BusStop {
        id: id.into(),
        name: name.into(),
        latitude,
        longitude,
        address: address.into(),
    }
}
