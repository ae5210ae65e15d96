use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use estate_ingest::config::Settings;
use estate_ingest::geo::{InMemoryInfraStore, ProximityCalculator};
use estate_ingest::geocode::{shared_cache, GeocodeResolver};
use estate_ingest::ingest::{InMemoryListingStore, IngestionOrchestrator};
use estate_ingest::models::Source;
use estate_ingest::scrapers::{AvitoAdapter, CianAdapter, SearchFilters, SourceAdapter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("🏠 Estate Ingest - listing ingestion pipeline");
    info!("=============================================");

    let settings = Settings::from_env();
    let proxy = settings.proxy_url.as_deref();

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(CianAdapter::new(proxy)?),
        Arc::new(AvitoAdapter::new(proxy)?),
    ];

    let cache = shared_cache();
    let resolver = GeocodeResolver::from_settings(cache, &settings);
    let store = Arc::new(InMemoryListingStore::new());

    let orchestrator = IngestionOrchestrator::new(
        adapters,
        resolver,
        store.clone(),
        settings.default_city.clone(),
    )
    .with_proximity(ProximityCalculator::new(Arc::new(
        InMemoryInfraStore::sochi_demo(),
    )));

    let filters = SearchFilters::default();
    for source in [Source::Cian, Source::Avito] {
        info!("Ingesting one search page from {source}...");
        let report = orchestrator.ingest_search(source, &filters, 1).await;
        println!(
            "{}: {} found, {} saved, {} errors",
            source,
            report.items_found,
            report.items_saved,
            report.errors.len()
        );
        for error in &report.errors {
            println!("  ! {error}");
        }
    }

    let records = store.all();
    println!();
    for (i, record) in records.iter().enumerate() {
        let listing = &record.listing;
        println!(
            "{}. {} ({:.0} {})",
            i + 1,
            listing.title,
            listing.price,
            listing.currency
        );
        println!(
            "   {} | {} комн., {} м²",
            listing.address,
            listing.rooms.as_deref().unwrap_or("?"),
            listing.area_sqm
        );
        println!("   ID: {}", listing.source_id);
    }

    // Distance enrichment is an explicit step; show it on the first record.
    if let Some(first) = records.first() {
        if let Some(enriched) = orchestrator.enrich_distances(&first.listing).await {
            let distances = enriched
                .features
                .get("distances")
                .cloned()
                .unwrap_or_default();
            println!();
            println!("Nearest infrastructure for \"{}\":", first.listing.address);
            println!("{}", serde_json::to_string_pretty(&distances)?);
        }
    }

    let json = serde_json::to_string_pretty(&records)?;
    tokio::fs::write("ingested_listings.json", json).await?;
    info!("💾 Saved {} records to ingested_listings.json", records.len());

    Ok(())
}
