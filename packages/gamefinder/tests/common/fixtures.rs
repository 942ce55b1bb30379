//! Request and coordinate fixtures.

use gamefinder_core::common::{GeoPoint, OwnerId, EARTH_RADIUS_MILES};
use gamefinder_core::domains::requests::{Address, GameSystem, NewRequest, Role};

/// Address the mock geocoder knows by its street line.
pub fn address(street: &str) -> Address {
    Address::new(street, "Port Angeles", "WA", "98362")
}

pub fn dm_request(owner: OwnerId, system: GameSystem, range: u32, street: &str) -> NewRequest {
    NewRequest::new(owner, format!("{} table", street), system, Role::Dm, address(street))
        .with_travel_range(range)
}

pub fn player_request(owner: OwnerId, system: GameSystem, range: u32, street: &str) -> NewRequest {
    NewRequest::new(owner, street, system, Role::Player, address(street)).with_travel_range(range)
}

/// Point `miles` due north of `origin` along its meridian.
pub fn north_of(origin: GeoPoint, miles: f64) -> GeoPoint {
    let degrees = (miles / EARTH_RADIUS_MILES).to_degrees();
    GeoPoint::new(origin.longitude, origin.latitude + degrees)
}

/// Smallest latitude step north of `origin` whose haversine distance is at
/// least `miles`, so boundary tests see exactly what the comparison sees.
pub fn first_point_at_least(origin: GeoPoint, miles: f64) -> GeoPoint {
    let mut point = north_of(origin, miles);
    while origin.distance_miles(&point) >= miles {
        point.latitude = f64::from_bits(point.latitude.to_bits() - 1);
    }
    while origin.distance_miles(&point) < miles {
        point.latitude = f64::from_bits(point.latitude.to_bits() + 1);
    }
    point
}
