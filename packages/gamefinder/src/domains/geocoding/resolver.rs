use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::cache::{CacheStats, GeocodeCache};
use super::nominatim::NominatimGeocoder;
use super::synthetic::{DisabledGeocoder, SyntheticGeocoder};
use super::GeocodeError;
use crate::common::GeoPoint;
use crate::config::{GeocoderConfig, GeocoderStrategy};
use crate::domains::requests::Address;
use crate::kernel::BaseGeocoder;

/// Deadline applied around every provider call.
pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns addresses into coordinates with exactly one strategy per instance.
///
/// Provider failures, timeouts and "not found" all come back as `None`:
/// an unresolved address is a valid state, not an error.
pub struct GeoResolver {
    geocoder: Arc<dyn BaseGeocoder>,
    cache: Option<Mutex<GeocodeCache>>,
    timeout: Duration,
}

impl GeoResolver {
    /// Wrap a geocoder. The cache is used only if the geocoder is cacheable.
    pub fn new(geocoder: Arc<dyn BaseGeocoder>, cache: GeocodeCache, timeout: Duration) -> Self {
        let cache = geocoder.cacheable().then(|| Mutex::new(cache));
        Self {
            geocoder,
            cache,
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self::new(
            Arc::new(DisabledGeocoder),
            GeocodeCache::with_capacity(0),
            DEFAULT_GEOCODE_TIMEOUT,
        )
    }

    pub fn synthetic() -> Self {
        Self::new(
            Arc::new(SyntheticGeocoder::default()),
            GeocodeCache::with_capacity(0),
            DEFAULT_GEOCODE_TIMEOUT,
        )
    }

    /// Build the strategy selected in configuration.
    pub fn from_config(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let geocoder: Arc<dyn BaseGeocoder> = match config.strategy {
            GeocoderStrategy::Live => Arc::new(NominatimGeocoder::new(
                config.nominatim_url.clone(),
                &config.user_agent,
                config.timeout,
                config.requests_per_second,
            )?),
            GeocoderStrategy::Synthetic => Arc::new(SyntheticGeocoder::default()),
            GeocoderStrategy::Disabled => Arc::new(DisabledGeocoder),
        };
        info!(strategy = geocoder.name(), "Geocoder configured");

        Ok(Self::new(
            geocoder,
            GeocodeCache::with_capacity(config.cache_capacity),
            config.timeout,
        ))
    }

    pub fn strategy(&self) -> &'static str {
        self.geocoder.name()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.lock().ok().map(|c| c.stats()))
    }

    #[instrument(skip(self, address), fields(strategy = self.geocoder.name()))]
    pub async fn resolve(&self, address: &Address) -> Option<GeoPoint> {
        let key = address.normalized();

        if let Some(cache) = &self.cache {
            if let Some(point) = cache.lock().ok().and_then(|mut c| c.get(&key)) {
                debug!("Geocode cache hit");
                return Some(point);
            }
        }

        let outcome = match tokio::time::timeout(self.timeout, self.geocoder.geocode(address)).await
        {
            Ok(result) => result,
            Err(_) => Err(GeocodeError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(Some(point)) => {
                if let Some(cache) = &self.cache {
                    if let Ok(mut c) = cache.lock() {
                        c.insert(key, point);
                    }
                }
                Some(point)
            }
            Ok(None) => {
                warn!(address = %address, "Address could not be resolved");
                None
            }
            Err(e) => {
                warn!(error = %e, address = %address, "Geocoding failed, leaving address unresolved");
                None
            }
        }
    }
}
