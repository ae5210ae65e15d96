//! Ingestion and enrichment pipeline for third-party real-estate listings.
//!
//! Marketplace adapters (CIAN, Avito) normalize heterogeneous payloads into
//! one canonical listing shape, a tiered geocoder resolves addresses to
//! coordinates, and a proximity calculator attaches nearest-infrastructure
//! distances before records are handed to the persistence collaborator.

pub mod config;
pub mod geo;
pub mod geocode;
pub mod ingest;
pub mod models;
pub mod scrapers;
