use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{DistanceMap, GeoPoint};

/// Infrastructure categories tracked by the proximity calculator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum InfraCategory {
    School,
    Airport,
    Sea,
    Park,
    Shop,
    Hospital,
}

impl InfraCategory {
    pub const ALL: [InfraCategory; 6] = [
        InfraCategory::School,
        InfraCategory::Airport,
        InfraCategory::Sea,
        InfraCategory::Park,
        InfraCategory::Shop,
        InfraCategory::Hospital,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InfraCategory::School => "school",
            InfraCategory::Airport => "airport",
            InfraCategory::Sea => "sea",
            InfraCategory::Park => "park",
            InfraCategory::Shop => "shop",
            InfraCategory::Hospital => "hospital",
        }
    }
}

impl fmt::Display for InfraCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the read-only infrastructure reference dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraPoint {
    pub name: String,
    pub category: InfraCategory,
    pub latitude: f64,
    pub longitude: f64,
}

/// Boundary to the infrastructure reference dataset.
#[async_trait]
pub trait InfraStore: Send + Sync {
    /// Whether the backing store can evaluate spherical distance. Embedded
    /// or test stores without a spatial extension report `false`.
    fn supports_spherical(&self) -> bool;

    /// Distance in meters to the nearest point of the category, `None` when
    /// the category has no members.
    async fn nearest(&self, point: GeoPoint, category: InfraCategory) -> Result<Option<f64>>;
}

/// In-memory reference dataset, used by tests and the demo binary.
pub struct InMemoryInfraStore {
    points: Vec<InfraPoint>,
    spatial: bool,
}

impl InMemoryInfraStore {
    pub fn new(points: Vec<InfraPoint>) -> Self {
        Self {
            points,
            spatial: true,
        }
    }

    /// Store that reports no spherical-distance capability, mirroring an
    /// embedded backend without its spatial extension.
    pub fn without_spatial(points: Vec<InfraPoint>) -> Self {
        Self {
            points,
            spatial: false,
        }
    }

    /// Small Sochi dataset for the demo binary.
    pub fn sochi_demo() -> Self {
        let point = |name: &str, category, latitude, longitude| InfraPoint {
            name: name.to_string(),
            category,
            latitude,
            longitude,
        };
        Self::new(vec![
            point("Гимназия №8", InfraCategory::School, 43.5852, 39.7203),
            point("Аэропорт Сочи", InfraCategory::Airport, 43.4499, 39.9566),
            point("Центральный пляж", InfraCategory::Sea, 43.5782, 39.7178),
            point("Парк Ривьера", InfraCategory::Park, 43.5917, 39.7157),
            point("ТЦ Моремолл", InfraCategory::Shop, 43.6022, 39.7333),
            point("Городская больница №4", InfraCategory::Hospital, 43.5918, 39.7429),
        ])
    }
}

#[async_trait]
impl InfraStore for InMemoryInfraStore {
    fn supports_spherical(&self) -> bool {
        self.spatial
    }

    async fn nearest(&self, point: GeoPoint, category: InfraCategory) -> Result<Option<f64>> {
        let nearest = self
            .points
            .iter()
            .filter(|p| p.category == category)
            .map(|p| haversine_distance(point, GeoPoint::new(p.latitude, p.longitude)))
            .min_by(|a, b| a.total_cmp(b));
        Ok(nearest)
    }
}

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Round a distance to the nearest 10 meters.
pub fn round_to_ten(meters: f64) -> i64 {
    (meters / 10.0).round() as i64 * 10
}

// Placeholder schedule for stores without spherical-distance support.
const PLACEHOLDER_BASE_METERS: i64 = 500;
const PLACEHOLDER_STEP_METERS: i64 = 250;

/// Computes nearest-infrastructure distances for a resolved coordinate.
pub struct ProximityCalculator {
    store: Arc<dyn InfraStore>,
}

impl ProximityCalculator {
    pub fn new(store: Arc<dyn InfraStore>) -> Self {
        Self { store }
    }

    /// One entry per requested category; total, never fails.
    ///
    /// Category queries run concurrently and are awaited together. A store
    /// without spherical-distance support yields deterministic placeholders
    /// (monotonically offset per category) so callers need no store-specific
    /// branches. A per-category query failure degrades that category to
    /// `None` without aborting the map.
    pub async fn nearest_distances(
        &self,
        point: GeoPoint,
        categories: &[InfraCategory],
    ) -> DistanceMap {
        if !self.store.supports_spherical() {
            return categories
                .iter()
                .enumerate()
                .map(|(i, category)| {
                    let distance = PLACEHOLDER_BASE_METERS + PLACEHOLDER_STEP_METERS * i as i64;
                    (category.as_str().to_string(), Some(distance))
                })
                .collect();
        }

        let queries = categories.iter().map(|&category| {
            let store = Arc::clone(&self.store);
            async move { (category, store.nearest(point, category).await) }
        });

        join_all(queries)
            .await
            .into_iter()
            .map(|(category, result)| {
                let distance = match result {
                    Ok(Some(meters)) => Some(round_to_ten(meters)),
                    Ok(None) => None,
                    Err(e) => {
                        warn!("nearest-{category} query failed: {e}");
                        None
                    }
                };
                (category.as_str().to_string(), distance)
            })
            .collect()
    }
}
