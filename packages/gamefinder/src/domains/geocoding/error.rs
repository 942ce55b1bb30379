use thiserror::Error;

/// Provider-side failures. Never leaves the resolver: `GeoResolver` logs these
/// and reports the address as unresolved.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request to the provider failed
    #[error("geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Lookup exceeded the resolver deadline
    #[error("geocoding timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Provider answered with something we could not read
    #[error("invalid geocoding response: {0}")]
    InvalidResponse(String),
}
