use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::models::GeoPoint;

/// External geocoder boundary: one free-text query, a list of candidates.
/// The first candidate's coordinate is authoritative; the rest are ignored.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<GeoPoint>;
}

const GEOCODER_URL: &str = "https://catalog.api.2gis.com/3.0/items/geocode";

#[derive(Deserialize)]
struct GeocodeResponse {
    result: Option<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    items: Vec<GeocodeItem>,
}

#[derive(Deserialize)]
struct GeocodeItem {
    point: Option<Point>,
}

#[derive(Deserialize)]
struct Point {
    lat: f64,
    lon: f64,
}

/// 2GIS geocoder client. Single attempt, bounded timeout, no retries.
pub struct DgisProvider {
    client: Client,
    api_key: String,
}

impl DgisProvider {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create geocoder HTTP client")?;

        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl GeocodeProvider for DgisProvider {
    async fn lookup(&self, query: &str) -> Result<GeoPoint> {
        let response = self
            .client
            .get(GEOCODER_URL)
            .query(&[
                ("q", query),
                ("key", &self.api_key),
                ("fields", "items.point"),
                ("locale", "ru_RU"),
            ])
            .send()
            .await
            .context("geocoder request failed")?;

        if !response.status().is_success() {
            bail!("geocoder returned {}", response.status());
        }

        let body: GeocodeResponse = response
            .json()
            .await
            .context("geocoder response was not valid JSON")?;

        let point = body
            .result
            .and_then(|r| r.items.into_iter().next())
            .and_then(|item| item.point);

        match point {
            Some(point) => {
                debug!("geocoded {query} -> ({}, {})", point.lat, point.lon);
                Ok(GeoPoint::new(point.lat, point.lon))
            }
            None => bail!("geocoder returned no candidates for {query}"),
        }
    }
}
