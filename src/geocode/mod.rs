mod provider;

pub use provider::{DgisProvider, GeocodeProvider};

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::config::Settings;
use crate::models::GeoPoint;

/// Curated Sochi addresses the cache is pre-seeded with, so the service
/// works for its primary city even with no geocoder key at all.
const KNOWN_SOCHI_ADDRESSES: &[(&str, f64, f64)] = &[
    // Central district
    ("ул. Орджоникидзе, 17", 43.5807, 39.7188),
    ("пер. Морской, 1", 43.5802, 39.7214),
    ("Курортный пр., 105Б", 43.5689, 39.7395),
    ("ул. Орджоникидзе, 11А", 43.5815, 39.7196),
    ("ул. Гагринская, 10", 43.5701, 39.7342),
    ("ул. Войкова, 21", 43.5840, 39.7225),
    ("ул. Плеханова, 34Б", 43.6052, 39.7041),
    ("Курортный пр., 92/5", 43.5612, 39.7521),
    ("ул. Егорова, 1", 43.5885, 39.7145),
    ("ул. Театральная, 2", 43.5744, 39.7297),
    ("Курортный пр., 108", 43.5668, 39.7423),
    ("Курортный пр., 105", 43.5635, 39.7482),
    ("ул. Чайковского, 15", 43.5950, 39.7280),
    ("Навагинская ул., 9Д", 43.5866, 39.7170),
    ("ул. Есауленко, 4", 43.5550, 39.7600),
    ("ул. Приморская, 15", 43.5823, 39.7201),
    ("Курортный проспект, 100", 43.5698, 39.7378),
    ("ул. Навагинская, 8", 43.5871, 39.7165),
    ("ул. Виноградная, 22", 43.5789, 39.7245),
    ("ул. Парковая, 5", 43.5756, 39.7312),
    ("ул. Горького, 45", 43.5834, 39.7189),
    ("ул. Красноармейская, 7", 43.5812, 39.7223),
    ("ул. Театральная, 28", 43.5751, 39.7289),
    // Adler
    ("ул. Ленина, 219", 43.4312, 39.9187),
    ("ул. Демократическая, 38", 43.4256, 39.9234),
    // Krasnaya Polyana
    ("ул. Защитников Кавказа, 1", 43.6789, 40.2012),
];

/// Insertion-ordered address -> coordinate cache.
///
/// Append-only during the process lifetime. Fuzzy lookups walk entries in
/// insertion order so "first match wins" stays deterministic.
pub struct AddressCache {
    entries: Vec<(String, GeoPoint)>,
}

impl AddressCache {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Cache pre-seeded with the curated Sochi address set.
    pub fn with_known_addresses() -> Self {
        Self {
            entries: KNOWN_SOCHI_ADDRESSES
                .iter()
                .map(|&(address, lat, lon)| (address.to_string(), GeoPoint::new(lat, lon)))
                .collect(),
        }
    }

    pub fn lookup_exact(&self, address: &str) -> Option<GeoPoint> {
        self.entries
            .iter()
            .find(|(cached, _)| cached == address)
            .map(|&(_, point)| point)
    }

    /// Substring containment in either direction; the first entry in
    /// insertion order wins. No normalization or scoring.
    pub fn lookup_fuzzy(&self, address: &str) -> Option<GeoPoint> {
        self.entries
            .iter()
            .find(|(cached, _)| cached.contains(address) || address.contains(cached.as_str()))
            .map(|&(_, point)| point)
    }

    /// Upsert by key; new addresses keep their insertion position.
    pub fn insert(&mut self, address: String, point: GeoPoint) {
        if let Some(entry) = self.entries.iter_mut().find(|(cached, _)| *cached == address) {
            entry.1 = point;
        } else {
            self.entries.push((address, point));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::with_known_addresses()
    }
}

/// Process-wide cache handle: constructed once, passed by reference into the
/// resolver, substitutable in tests.
pub type SharedAddressCache = Arc<RwLock<AddressCache>>;

pub fn shared_cache() -> SharedAddressCache {
    Arc::new(RwLock::new(AddressCache::with_known_addresses()))
}

/// Tiered address resolver: exact cache, fuzzy cache, live provider, safe
/// default. Total — every lookup produces a coordinate.
pub struct GeocodeResolver {
    cache: SharedAddressCache,
    provider: Option<Arc<dyn GeocodeProvider>>,
    default_point: GeoPoint,
}

impl GeocodeResolver {
    /// Resolver wired from settings; the provider tier is only present when
    /// a real geocoder key is configured.
    pub fn from_settings(cache: SharedAddressCache, settings: &Settings) -> Self {
        let provider = settings.geocoder_api_key.as_ref().and_then(|key| {
            match DgisProvider::new(key.clone()) {
                Ok(provider) => Some(Arc::new(provider) as Arc<dyn GeocodeProvider>),
                Err(e) => {
                    warn!("failed to construct geocoder client: {e}");
                    None
                }
            }
        });

        Self::new(cache, provider, settings.city_center)
    }

    pub fn new(
        cache: SharedAddressCache,
        provider: Option<Arc<dyn GeocodeProvider>>,
        default_point: GeoPoint,
    ) -> Self {
        Self {
            cache,
            provider,
            default_point,
        }
    }

    /// Resolve an address to a coordinate. First hit wins; never fails.
    pub async fn resolve(&self, address: &str, city: &str) -> GeoPoint {
        if let Some(point) = self.cached(address) {
            return point;
        }

        let Some(provider) = &self.provider else {
            debug!("no geocoder configured, using city-center default for: {address}");
            return self.default_point;
        };

        match provider.lookup(&format!("{city}, {address}")).await {
            Ok(point) if point.is_valid() => {
                // Cache under the original address so the next lookup for
                // this exact string is a tier-1 hit.
                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(address.to_string(), point);
                }
                point
            }
            Ok(point) => {
                warn!(
                    "geocoder returned out-of-range coordinates ({}, {}) for {address}",
                    point.latitude, point.longitude
                );
                self.default_point
            }
            Err(e) => {
                warn!("geocoding failed for {address}: {e}");
                self.default_point
            }
        }
    }

    /// Cache-only variant for contexts that cannot await I/O. Performs the
    /// exact and fuzzy tiers, then the default; never touches the provider.
    pub fn resolve_sync(&self, address: &str) -> GeoPoint {
        self.cached(address).unwrap_or(self.default_point)
    }

    fn cached(&self, address: &str) -> Option<GeoPoint> {
        let cache = self.cache.read().ok()?;

        if let Some(point) = cache.lookup_exact(address) {
            debug!("address cache exact hit: {address}");
            return Some(point);
        }
        if let Some(point) = cache.lookup_fuzzy(address) {
            debug!("address cache fuzzy hit: {address}");
            return Some(point);
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use async_trait::async_trait;

    use crate::config::CITY_CENTER;

    /// Provider double that counts invocations and serves a scripted answer.
    pub(crate) struct CountingProvider {
        pub calls: AtomicUsize,
        pub answer: Option<GeoPoint>,
    }

    impl CountingProvider {
        pub fn returning(point: GeoPoint) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer: Some(point),
            }
        }

        pub fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer: None,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeocodeProvider for CountingProvider {
        async fn lookup(&self, _query: &str) -> anyhow::Result<GeoPoint> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Some(point) => Ok(point),
                None => bail!("scripted provider failure"),
            }
        }
    }

    fn resolver_with(provider: Option<Arc<dyn GeocodeProvider>>) -> GeocodeResolver {
        GeocodeResolver::new(shared_cache(), provider, CITY_CENTER)
    }

    #[tokio::test]
    async fn known_address_resolves_to_literal_cached_pair() {
        let resolver = resolver_with(None);
        let point = resolver.resolve("ул. Орджоникидзе, 17", "Сочи").await;
        assert_eq!(point, GeoPoint::new(43.5807, 39.7188));
    }

    #[tokio::test]
    async fn cached_address_never_reaches_the_provider() {
        let provider = Arc::new(CountingProvider::returning(GeoPoint::new(1.0, 2.0)));
        let resolver = resolver_with(Some(provider.clone()));

        let point = resolver.resolve("ул. Театральная, 2", "Сочи").await;
        assert_eq!(point, GeoPoint::new(43.5744, 39.7297));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn fuzzy_containment_matches_either_direction_first_entry_wins() {
        let resolver = resolver_with(None);

        // Cached entry contained in the query.
        let point = resolver
            .resolve("Сочи, ул. Орджоникидзе, 17, корп. 2", "Сочи")
            .await;
        assert_eq!(point, GeoPoint::new(43.5807, 39.7188));

        // Query contained in a cached entry. Both "Курортный пр., 105Б" and
        // "Курортный пр., 105" contain the query; the one inserted first
        // wins.
        let fuzzy = {
            let cache = shared_cache();
            let cache = cache.read().unwrap();
            cache.lookup_fuzzy("Курортный пр., 10")
        };
        assert_eq!(fuzzy, Some(GeoPoint::new(43.5689, 39.7395)));
    }

    #[tokio::test]
    async fn unknown_address_without_key_yields_exactly_the_default() {
        let resolver = resolver_with(None);
        let point = resolver.resolve("ул. Незнакомая, 99", "Сочи").await;
        assert_eq!(point, CITY_CENTER);
    }

    #[tokio::test]
    async fn provider_success_is_returned_and_cached_under_original_address() {
        let resolved = GeoPoint::new(43.6000, 39.7300);
        let provider = Arc::new(CountingProvider::returning(resolved));
        let cache = shared_cache();
        let resolver = GeocodeResolver::new(cache.clone(), Some(provider.clone()), CITY_CENTER);

        let point = resolver.resolve("ул. Новая, 3", "Сочи").await;
        assert_eq!(point, resolved);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            cache.read().unwrap().lookup_exact("ул. Новая, 3"),
            Some(resolved)
        );

        // Repeat lookup is now a tier-1 hit: no second provider call.
        let again = resolver.resolve("ул. Новая, 3", "Сочи").await;
        assert_eq!(again, resolved);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_default_without_caching() {
        let provider = Arc::new(CountingProvider::failing());
        let cache = shared_cache();
        let seeded = cache.read().unwrap().len();
        let resolver = GeocodeResolver::new(cache.clone(), Some(provider.clone()), CITY_CENTER);

        let point = resolver.resolve("ул. Сбойная, 1", "Сочи").await;
        assert_eq!(point, CITY_CENTER);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(cache.read().unwrap().len(), seeded);
    }

    #[test]
    fn sync_variant_never_touches_the_provider() {
        let provider = Arc::new(CountingProvider::returning(GeoPoint::new(1.0, 2.0)));
        let resolver = resolver_with(Some(provider.clone()));

        assert_eq!(
            resolver.resolve_sync("ул. Орджоникидзе, 17"),
            GeoPoint::new(43.5807, 39.7188)
        );
        assert_eq!(resolver.resolve_sync("ул. Незнакомая, 99"), CITY_CENTER);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn out_of_range_provider_answer_falls_back_to_default_without_caching() {
        // A geocoder serving swapped lat/lon must not poison the cache or
        // the stored listing.
        let provider = Arc::new(CountingProvider::returning(GeoPoint::new(120.0, 500.0)));
        let cache = shared_cache();
        let seeded = cache.read().unwrap().len();
        let resolver = GeocodeResolver::new(cache.clone(), Some(provider.clone()), CITY_CENTER);

        let point = resolver.resolve("ул. Сдвинутая, 2", "Сочи").await;
        assert_eq!(point, CITY_CENTER);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(cache.read().unwrap().len(), seeded);
    }

    #[test]
    fn cache_insert_is_an_upsert() {
        let mut cache = AddressCache::new();
        cache.insert("aa".to_string(), GeoPoint::new(1.0, 1.0));
        cache.insert("ab".to_string(), GeoPoint::new(2.0, 2.0));
        cache.insert("aa".to_string(), GeoPoint::new(3.0, 3.0));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup_exact("aa"), Some(GeoPoint::new(3.0, 3.0)));
        // Upsert keeps the original insertion position: a fuzzy query that
        // matches both entries still lands on the first-inserted key.
        assert_eq!(cache.lookup_fuzzy("a"), Some(GeoPoint::new(3.0, 3.0)));
    }
}
