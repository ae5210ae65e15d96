use std::env;

use crate::models::GeoPoint;

/// Fallback coordinate for the primary city (Sochi center).
pub const CITY_CENTER: GeoPoint = GeoPoint::new(43.5855, 39.7231);

/// Runtime configuration pulled from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// 2GIS geocoder key. `None` (or the "demo" sentinel) keeps the resolver
    /// on its cache-plus-default tiers.
    pub geocoder_api_key: Option<String>,
    /// Optional upstream proxy, passed through to the adapters per request.
    pub proxy_url: Option<String>,
    /// City prepended to provider geocoding queries.
    pub default_city: String,
    /// Safe default returned when every resolver tier misses.
    pub city_center: GeoPoint,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            geocoder_api_key: env::var("DGIS_API_KEY")
                .ok()
                .filter(|key| !key.is_empty() && key != "demo"),
            proxy_url: env::var("PROXY_URL").ok().filter(|url| !url.is_empty()),
            default_city: env::var("DEFAULT_CITY").unwrap_or_else(|_| "Сочи".to_string()),
            city_center: CITY_CENTER,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geocoder_api_key: None,
            proxy_url: None,
            default_city: "Сочи".to_string(),
            city_center: CITY_CENTER,
        }
    }
}
