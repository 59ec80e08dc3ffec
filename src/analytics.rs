use crate::catalog::Route;
use crate::fleet::{Bus, BusStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePerformance {
    pub route_id: String,
    pub route_name: String,
    pub bus_count: u32,
    pub avg_occupancy_percent: u32,
    pub on_time_count: u32,
    pub delayed_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAnalytics {
    pub total_buses: u32,
    pub active_buses: u32,
    pub delayed_buses: u32,
    pub total_passengers: u64,
    pub average_occupancy_percent: u32,
    /// One entry per catalog route, in catalog order.
    pub route_performance: Vec<RoutePerformance>,
}

/// Fleet-wide and per-route statistics for one snapshot.
///
/// Buses whose route is missing from `routes` still count toward the
/// fleet-wide totals but appear in no route entry.
pub fn compute_analytics(buses: &[Bus], routes: &[Route]) -> FleetAnalytics {
    let route_performance = routes
        .iter()
        .map(|route| {
            let on_route: Vec<&Bus> = buses.iter().filter(|bus| bus.route_id == route.id).collect();
            RoutePerformance {
                route_id: route.id.clone(),
                route_name: route.name.clone(),
                bus_count: count(on_route.iter().copied(), |_| true),
                avg_occupancy_percent: average_occupancy_percent(on_route.iter().copied()),
                on_time_count: count(on_route.iter().copied(), |bus| bus.status == BusStatus::Active),
                delayed_count: count(on_route.iter().copied(), |bus| bus.status == BusStatus::Delayed),
            }
        })
        .collect();

    FleetAnalytics {
        total_buses: count(buses.iter(), |_| true),
        active_buses: count(buses.iter(), |bus| bus.status == BusStatus::Active),
        delayed_buses: count(buses.iter(), |bus| bus.status == BusStatus::Delayed),
        total_passengers: buses.iter().map(|bus| u64::from(bus.occupancy)).sum(),
        average_occupancy_percent: average_occupancy_percent(buses.iter()),
        route_performance,
    }
}

fn count<'a>(buses: impl Iterator<Item = &'a Bus>, predicate: impl Fn(&Bus) -> bool) -> u32 {
    let n = buses.filter(|bus| predicate(*bus)).count();
    u32::try_from(n).unwrap_or(u32::MAX)
}

// Mean of per-bus load factors, rounded to the nearest whole percent; 0 for no buses.
fn average_occupancy_percent<'a>(buses: impl Iterator<Item = &'a Bus>) -> u32 {
    let (sum, n) = buses.fold((0.0_f64, 0_u32), |(sum, n), bus| {
        let load = if bus.capacity == 0 {
            0.0
        } else {
            f64::from(bus.occupancy) / f64::from(bus.capacity)
        };
        (sum + load, n + 1)
    });

    if n == 0 {
        return 0;
    }
    (sum / f64::from(n) * 100.0).round() as u32
}
