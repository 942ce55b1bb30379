use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::GeocodeError;
use crate::common::GeoPoint;
use crate::domains::requests::Address;
use crate::kernel::BaseGeocoder;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Nominatim API response for geocoding
#[derive(Debug, Deserialize)]
struct NominatimResponse {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

/// Live geocoder backed by the Nominatim (OpenStreetMap) search API.
///
/// Nominatim is free but allows roughly one request per second, so every call
/// waits on an outbound rate limiter before hitting the network.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    limiter: DirectRateLimiter,
}

impl NominatimGeocoder {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(quota),
        })
    }
}

#[async_trait]
impl BaseGeocoder for NominatimGeocoder {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn cacheable(&self) -> bool {
        true
    }

    #[instrument(skip(self, address), fields(city = %address.city, state = %address.state))]
    async fn geocode(&self, address: &Address) -> Result<Option<GeoPoint>, GeocodeError> {
        self.limiter.until_ready().await;

        let query = address.one_line();
        let url = format!(
            "{}/search?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(&query)
        );
        debug!("Geocoding address: {}", query);

        let response: Vec<NominatimResponse> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(result) = response.first() else {
            warn!("Address not found by geocoding API");
            return Ok(None);
        };

        let latitude = parse_coordinate("latitude", &result.lat, 90.0)?;
        let longitude = parse_coordinate("longitude", &result.lon, 180.0)?;

        debug!(
            "Geocoded {} → ({}, {}) [{}]",
            query, longitude, latitude, result.display_name
        );
        Ok(Some(GeoPoint::new(longitude, latitude)))
    }
}

/// Nominatim sends coordinates as strings. Anything that is not a finite
/// number within `±limit` degrees is rejected rather than stored.
fn parse_coordinate(axis: &str, raw: &str, limit: f64) -> Result<f64, GeocodeError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| GeocodeError::InvalidResponse(format!("{} {:?}: {}", axis, raw, e)))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(GeocodeError::InvalidResponse(format!(
            "{} {:?} outside ±{}",
            axis, raw, limit
        )));
    }
    Ok(value)
}
