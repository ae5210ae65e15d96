use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::geo::{InfraCategory, ProximityCalculator};
use crate::geocode::GeocodeResolver;
use crate::models::{NormalizedListing, Source};
use crate::scrapers::{SearchFilters, SourceAdapter};

/// Boundary to whatever persists listings. The pipeline never issues
/// queries beyond this contract.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn find_by_source_id(
        &self,
        source: Source,
        source_id: &str,
    ) -> Result<Option<StoredListing>>;

    async fn create(&self, listing: &NormalizedListing) -> Result<StoredListing>;
}

/// A listing as returned by the persistence collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct StoredListing {
    pub id: String,
    pub listing: NormalizedListing,
}

/// In-memory store with a uniqueness constraint on (source, source_id).
/// Backs tests and the demo binary.
pub struct InMemoryListingStore {
    records: RwLock<HashMap<(Source, String), StoredListing>>,
    next_id: AtomicU64,
}

impl InMemoryListingStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// All stored records, unordered.
    pub fn all(&self) -> Vec<StoredListing> {
        self.records
            .read()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryListingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingStore for InMemoryListingStore {
    async fn find_by_source_id(
        &self,
        source: Source,
        source_id: &str,
    ) -> Result<Option<StoredListing>> {
        let records = match self.records.read() {
            Ok(records) => records,
            Err(_) => bail!("listing store lock poisoned"),
        };
        Ok(records.get(&(source, source_id.to_string())).cloned())
    }

    async fn create(&self, listing: &NormalizedListing) -> Result<StoredListing> {
        let mut records = match self.records.write() {
            Ok(records) => records,
            Err(_) => bail!("listing store lock poisoned"),
        };

        let key = (listing.source, listing.source_id.clone());
        if records.contains_key(&key) {
            bail!(
                "duplicate source_id {} for source {}",
                listing.source_id,
                listing.source
            );
        }

        let stored = StoredListing {
            id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
            listing: listing.clone(),
        };
        records.insert(key, stored.clone());
        Ok(stored)
    }
}

/// Cap on errors carried back to the caller; the batch itself continues
/// past every one of them.
const MAX_REPORTED_ERRORS: usize = 10;

/// Outcome of one ingestion run.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub source: Option<Source>,
    pub items_found: usize,
    pub items_saved: usize,
    pub errors: Vec<String>,
}

impl IngestReport {
    fn new(source: Option<Source>) -> Self {
        Self {
            source,
            items_found: 0,
            items_saved: 0,
            errors: Vec::new(),
        }
    }

    fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            // Store errors can carry whole payloads; keep entries short.
            self.errors.push(message.chars().take(100).collect());
        }
    }
}

/// Drives one listing batch end-to-end: adapter fetch, geocode enrichment
/// for coordinate-less records, hand-off to the persistence collaborator.
pub struct IngestionOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    resolver: GeocodeResolver,
    store: Arc<dyn ListingStore>,
    proximity: Option<ProximityCalculator>,
    default_city: String,
}

impl IngestionOrchestrator {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        resolver: GeocodeResolver,
        store: Arc<dyn ListingStore>,
        default_city: String,
    ) -> Self {
        Self {
            adapters,
            resolver,
            store,
            proximity: None,
            default_city,
        }
    }

    /// Enable the optional distance-enrichment step.
    pub fn with_proximity(mut self, proximity: ProximityCalculator) -> Self {
        self.proximity = Some(proximity);
        self
    }

    fn adapter_for(&self, source: Source) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.source() == source)
    }

    /// Run a multi-page search ingest for one source.
    ///
    /// Pages are fetched as concurrent tasks and awaited together; the
    /// adapter's rate limiter still serializes the actual requests.
    pub async fn ingest_search(
        &self,
        source: Source,
        filters: &SearchFilters,
        max_pages: u32,
    ) -> IngestReport {
        let mut report = IngestReport::new(Some(source));

        let Some(adapter) = self.adapter_for(source) else {
            report.push_error(format!("no adapter registered for source {source}"));
            return report;
        };

        let pages =
            join_all((1..=max_pages).map(|page| adapter.search_listings(filters, page))).await;

        for listing in pages.into_iter().flatten() {
            report.items_found += 1;
            self.persist_one(listing, &mut report).await;
        }

        info!(
            "ingest from {source}: {} found, {} saved, {} errors",
            report.items_found,
            report.items_saved,
            report.errors.len()
        );
        report
    }

    /// Ingest a single listing URL; the source is detected from the domain.
    pub async fn ingest_url(&self, url: &str) -> IngestReport {
        let Some(source) = Source::from_url(url) else {
            let mut report = IngestReport::new(None);
            report.push_error(format!("unsupported URL: {url}"));
            return report;
        };

        let mut report = IngestReport::new(Some(source));
        let Some(adapter) = self.adapter_for(source) else {
            report.push_error(format!("no adapter registered for source {source}"));
            return report;
        };

        match adapter.parse_listing(url).await {
            Some(listing) => {
                report.items_found = 1;
                self.persist_one(listing, &mut report).await;
            }
            None => report.push_error(format!("failed to parse listing: {url}")),
        }
        report
    }

    /// Run already-normalized listings (manual entries, pre-fetched batches)
    /// through the same dedup/enrich/persist path.
    pub async fn ingest_batch(&self, listings: Vec<NormalizedListing>) -> IngestReport {
        let mut report = IngestReport::new(None);
        for listing in listings {
            report.items_found += 1;
            self.persist_one(listing, &mut report).await;
        }
        report
    }

    /// Attach nearest-infrastructure distances to a listing.
    ///
    /// Explicitly triggered enrichment, not part of every ingest. `None`
    /// when no proximity calculator is wired or the listing has no
    /// coordinates.
    pub async fn enrich_distances(
        &self,
        listing: &NormalizedListing,
    ) -> Option<NormalizedListing> {
        let proximity = self.proximity.as_ref()?;
        let point = listing.coordinates()?;
        let distances = proximity.nearest_distances(point, &InfraCategory::ALL).await;
        Some(listing.with_distances(&distances))
    }

    async fn persist_one(&self, listing: NormalizedListing, report: &mut IngestReport) {
        // De-duplication by (source, source_id) is the sole guarantee the
        // pipeline provides.
        match self
            .store
            .find_by_source_id(listing.source, &listing.source_id)
            .await
        {
            Ok(Some(_)) => {
                debug!("{} already ingested, skipping", listing.source_id);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("lookup failed for {}: {e}", listing.source_id);
                report.push_error(format!("{} lookup error: {e}", listing.source));
                return;
            }
        }

        // Geocode only when the adapter supplied no coordinates.
        let enriched = if listing.coordinates().is_none() {
            let point = self
                .resolver
                .resolve(&listing.address, &self.default_city)
                .await;
            listing.with_coordinates(point)
        } else {
            listing
        };

        match self.store.create(&enriched).await {
            Ok(stored) => {
                debug!("persisted {} as record {}", enriched.source_id, stored.id);
                report.items_saved += 1;
            }
            Err(e) => {
                warn!("failed to persist {}: {e}", enriched.source_id);
                report.push_error(format!("{} save error: {e}", enriched.source));
            }
        }
    }
}
