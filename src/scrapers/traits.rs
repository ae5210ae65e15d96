use crate::models::{NormalizedListing, Source};
use crate::scrapers::types::SearchFilters;
use async_trait::async_trait;

/// Common trait for all listing source adapters.
/// Adding a new marketplace (Domclick, Yandex Realty, ...) means
/// implementing this trait.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch one page of search results, normalized.
    ///
    /// Never fails: transport errors, rate limiting, and blocked responses
    /// degrade to deterministic synthetic listings so downstream callers
    /// always receive something usable.
    async fn search_listings(&self, filters: &SearchFilters, page: u32) -> Vec<NormalizedListing>;

    /// Fetch and parse a single listing page.
    ///
    /// `None` when the page cannot be retrieved or parsed meaningfully.
    async fn parse_listing(&self, url: &str) -> Option<NormalizedListing>;

    /// Which marketplace this adapter covers.
    fn source(&self) -> Source;

    /// Deterministic synthetic listings used when the upstream is
    /// unreachable or blocking. Every `source_id` carries the adapter's
    /// mock tag prefix.
    fn generate_mock_data(&self, count: usize) -> Vec<NormalizedListing>;
}
