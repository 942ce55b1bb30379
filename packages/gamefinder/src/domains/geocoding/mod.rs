//! Address → coordinates resolution.
//!
//! One strategy is active per deployment: live (Nominatim), synthetic
//! (deterministic jitter around a base point) or disabled.

pub mod cache;
pub mod error;
pub mod nominatim;
pub mod resolver;
pub mod synthetic;

pub use cache::{CacheStats, GeocodeCache, DEFAULT_CACHE_CAPACITY};
pub use error::GeocodeError;
pub use nominatim::{NominatimGeocoder, DEFAULT_NOMINATIM_URL};
pub use resolver::{GeoResolver, DEFAULT_GEOCODE_TIMEOUT};
pub use synthetic::{DisabledGeocoder, SyntheticGeocoder, DEFAULT_SYNTHETIC_BASE};
