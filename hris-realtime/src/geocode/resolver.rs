//! Address resolution with retry and fallback
//!
//! [`AddressResolver::resolve`] never fails: after retries run out it returns
//! a human-readable fallback built from the coordinates.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use hris_common::config::GeocodeConfig;

use super::GeocodeError;

/// Single reverse-geocoding request
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    display_name: String,
}

/// Nominatim reverse-geocoding client
pub struct NominatimClient {
    http_client: reqwest::Client,
    url_template: String,
}

impl NominatimClient {
    pub fn new(config: &GeocodeConfig) -> Result<Self, GeocodeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GeocodeError::Lookup(e.to_string()))?;

        Ok(Self {
            http_client,
            url_template: config.nominatim_url.clone(),
        })
    }

    fn url_for(&self, latitude: f64, longitude: f64) -> String {
        self.url_template
            .replace("{lat}", &format!("{:.6}", latitude))
            .replace("{lon}", &format!("{:.6}", longitude))
    }
}

#[async_trait]
impl AddressLookup for NominatimClient {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, GeocodeError> {
        let url = self.url_for(latitude, longitude);
        debug!(url = %url, "Querying Nominatim");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeocodeError::Lookup(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body: ReverseResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Decode(e.to_string()))?;

        if body.display_name.is_empty() {
            return Err(GeocodeError::EmptyResult);
        }

        Ok(body.display_name)
    }
}

/// Fallback when the lookup response could not be interpreted
pub fn coordinates_label(latitude: f64, longitude: f64) -> String {
    format!("{:.6}, {:.6}", latitude, longitude)
}

/// Fallback when every attempt failed
pub fn unknown_location(latitude: f64, longitude: f64) -> String {
    format!("Unknown Location ({:.6}, {:.6})", latitude, longitude)
}

/// Retrying wrapper around an [`AddressLookup`]
pub struct AddressResolver {
    lookup: Arc<dyn AddressLookup>,
    max_attempts: u32,
    backoff: Duration,
}

impl AddressResolver {
    /// # Arguments
    /// * `max_attempts` - Total lookups per job (at least 1)
    /// * `backoff` - Attempt `n` (0-based) waits `n * backoff` before retrying
    pub fn new(lookup: Arc<dyn AddressLookup>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            lookup,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(lookup: Arc<dyn AddressLookup>, config: &GeocodeConfig) -> Self {
        Self::new(lookup, config.max_attempts, config.retry_backoff())
    }

    /// Resolve coordinates to an address, falling back to a coordinate label
    pub async fn resolve(&self, latitude: f64, longitude: f64) -> String {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * attempt).await;
                info!(attempt = attempt + 1, "Retrying address lookup");
            }

            match self.lookup.lookup(latitude, longitude).await {
                Ok(address) => return address,
                Err(GeocodeError::Decode(e)) => {
                    warn!(error = %e, "Address lookup response unreadable");
                    return coordinates_label(latitude, longitude);
                }
                Err(e) => {
                    debug!(attempt = attempt + 1, error = %e, "Address lookup failed");
                    last_error = Some(e);
                }
            }
        }

        warn!(
            attempts = self.max_attempts,
            error = ?last_error,
            "Address lookup failed after retries"
        );
        unknown_location(latitude, longitude)
    }
}
