use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of a property listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cian,
    Avito,
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cian => "cian",
            Source::Avito => "avito",
            Source::Manual => "manual",
        }
    }

    /// Detect the source from a listing URL domain.
    pub fn from_url(url: &str) -> Option<Source> {
        if url.contains("cian.ru") {
            Some(Source::Cian)
        } else if url.contains("avito.ru") {
            Some(Source::Avito)
        } else {
            None
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved (latitude, longitude) pair.
///
/// Latitude always comes first internally, regardless of the order an
/// upstream API returns the coordinates in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Nearest-distance-in-meters per infrastructure category, rounded to the
/// nearest 10 meters. `None` when the category has no members.
pub type DistanceMap = BTreeMap<String, Option<i64>>;

/// Canonical listing shape produced by every source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedListing {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub area_sqm: f64,
    pub rooms: Option<String>,
    pub floor: Option<i32>,
    pub total_floors: Option<i32>,
    pub source: Source,
    pub source_id: String,
    pub url: Option<String>,
    pub images: Vec<String>,
    pub features: HashMap<String, Value>,
    pub scraped_at: DateTime<Utc>,
}

impl NormalizedListing {
    /// Coordinates supplied by the adapter, if both components are present.
    pub fn coordinates(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    /// Enrichment copy with coordinates filled in. Adapter output is never
    /// mutated in place.
    pub fn with_coordinates(&self, point: GeoPoint) -> Self {
        let mut enriched = self.clone();
        enriched.latitude = Some(point.latitude);
        enriched.longitude = Some(point.longitude);
        enriched
    }

    /// Enrichment copy with nearest-infrastructure distances attached to the
    /// feature map under `"distances"`.
    pub fn with_distances(&self, distances: &DistanceMap) -> Self {
        let mut enriched = self.clone();
        let value = serde_json::to_value(distances).unwrap_or(Value::Null);
        enriched.features.insert("distances".to_string(), value);
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> NormalizedListing {
        NormalizedListing {
            title: "Квартира в Сочи".to_string(),
            description: String::new(),
            price: 12_000_000.0,
            currency: "RUB".to_string(),
            address: "ул. Театральная, 2".to_string(),
            latitude: None,
            longitude: None,
            area_sqm: 54.0,
            rooms: Some("2".to_string()),
            floor: Some(3),
            total_floors: Some(9),
            source: Source::Manual,
            source_id: "manual_1".to_string(),
            url: None,
            images: vec![],
            features: HashMap::new(),
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn source_detected_from_url() {
        assert_eq!(
            Source::from_url("https://sochi.cian.ru/sale/flat/123456/"),
            Some(Source::Cian)
        );
        assert_eq!(
            Source::from_url("https://www.avito.ru/sochi/kvartiry/2_k_987"),
            Some(Source::Avito)
        );
        assert_eq!(Source::from_url("https://example.com/flat/1"), None);
    }

    #[test]
    fn coordinates_require_both_components() {
        let mut l = listing();
        assert!(l.coordinates().is_none());
        l.latitude = Some(43.58);
        assert!(l.coordinates().is_none());
        l.longitude = Some(39.72);
        assert_eq!(l.coordinates(), Some(GeoPoint::new(43.58, 39.72)));
    }

    #[test]
    fn enrichment_copies_leave_original_untouched() {
        let original = listing();
        let point = GeoPoint::new(43.5744, 39.7297);
        let enriched = original.with_coordinates(point);

        assert!(original.latitude.is_none());
        assert_eq!(enriched.coordinates(), Some(point));

        let mut distances = DistanceMap::new();
        distances.insert("sea".to_string(), Some(800));
        distances.insert("park".to_string(), None);
        let with_dist = enriched.with_distances(&distances);

        assert!(!enriched.features.contains_key("distances"));
        let stored = with_dist.features.get("distances").unwrap();
        assert_eq!(stored["sea"], 800);
        assert!(stored["park"].is_null());
    }

    #[test]
    fn geo_point_range_validation() {
        assert!(GeoPoint::new(43.5855, 39.7231).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -181.0).is_valid());
    }
}
