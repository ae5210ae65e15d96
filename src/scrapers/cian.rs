use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::{NormalizedListing, Source};
use crate::scrapers::rate_limit::RateLimiter;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchFilters;
use crate::scrapers::{checked_coordinates, digits_only, number_before, numeric_value, stable_hash};

const SEARCH_URL: &str = "https://api.cian.ru/search-offers/v2/search-offers-desktop/";
const MOCK_TAG: &str = "cian_mock";
const MOCK_BATCH: usize = 5;

// Krasnodar Krai (covers Sochi) in CIAN's region taxonomy.
const REGION: u32 = 4998;

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Adapter for CIAN listings.
///
/// Talks to the desktop search API with rotated user agents and rate-limited
/// requests. Blocked or failed requests degrade to the deterministic mock
/// set instead of erroring.
pub struct CianAdapter {
    /// `None` means no live transport: every operation serves mock data.
    client: Option<Client>,
    limiter: RateLimiter,
}

impl CianAdapter {
    pub fn new(proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client: Some(client),
            limiter: Self::limiter(),
        })
    }

    /// Adapter without live transport, for environments where outbound
    /// scraping is unavailable or undesired.
    pub fn offline() -> Self {
        Self {
            client: None,
            limiter: Self::limiter(),
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(1), Duration::from_secs(3))
    }

    fn headers() -> HeaderMap {
        let agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://cian.ru/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://cian.ru"));
        headers
    }

    fn search_params(filters: &SearchFilters, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("region", REGION.to_string()),
            ("deal_type", "sale".to_string()),
            ("offer_type", "flat".to_string()),
            ("p", page.to_string()),
        ];
        if let Some(min) = filters.min_price {
            params.push(("minprice", min.to_string()));
        }
        if let Some(max) = filters.max_price {
            params.push(("maxprice", max.to_string()));
        }
        if let Some(rooms) = &filters.rooms {
            for count in rooms {
                params.push(("room", count.to_string()));
            }
        }
        params
    }

    /// Map a search response onto listings, degrading to mock data on
    /// anything other than a parseable HTTP 200.
    fn listings_from_search_response(
        &self,
        status: StatusCode,
        body: Result<Value>,
    ) -> Vec<NormalizedListing> {
        match status {
            StatusCode::OK => match body {
                Ok(data) => self.parse_search_results(&data),
                Err(e) => {
                    warn!("CIAN response body was not valid JSON: {e}");
                    self.generate_mock_data(MOCK_BATCH)
                }
            },
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("CIAN rate limit hit (429), serving mock data");
                self.generate_mock_data(MOCK_BATCH)
            }
            StatusCode::FORBIDDEN => {
                warn!("CIAN blocked the request (403), serving mock data");
                self.generate_mock_data(MOCK_BATCH)
            }
            other => {
                warn!("CIAN API returned {other}, serving mock data");
                self.generate_mock_data(MOCK_BATCH)
            }
        }
    }

    fn parse_search_results(&self, data: &Value) -> Vec<NormalizedListing> {
        let Some(offers) = data
            .pointer("/data/offersSerialized")
            .and_then(Value::as_array)
        else {
            warn!("CIAN payload is missing data.offersSerialized");
            return Vec::new();
        };

        offers
            .iter()
            .filter_map(|offer| {
                let parsed = Self::parse_offer(offer);
                if parsed.is_none() {
                    // One malformed offer must not abort the batch.
                    warn!("skipping CIAN offer that failed field extraction");
                }
                parsed
            })
            .collect()
    }

    fn parse_offer(offer: &Value) -> Option<NormalizedListing> {
        // The CIAN id is the de-duplication key; it is the one field an
        // offer cannot be normalized without.
        let cian_id = match offer.get("cianId")? {
            Value::Number(n) => n.to_string(),
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => return None,
        };

        let mut features = HashMap::new();
        if let Some(decoration) = offer.get("decoration").filter(|v| !v.is_null()) {
            features.insert("decoration".to_string(), decoration.clone());
        }
        features.insert(
            "balconies".to_string(),
            offer.get("balconiesCount").cloned().unwrap_or(json!(0)),
        );

        let (latitude, longitude) = checked_coordinates(
            offer.pointer("/geo/coordinates/lat").and_then(Value::as_f64),
            offer.pointer("/geo/coordinates/lng").and_then(Value::as_f64),
        );

        Some(NormalizedListing {
            title: offer
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Квартира")
                .to_string(),
            description: offer
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            price: offer
                .pointer("/bargainTerms/priceRur")
                .and_then(numeric_value)
                .unwrap_or(0.0),
            currency: "RUB".to_string(),
            address: offer
                .pointer("/geo/address/0/fullName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            latitude,
            longitude,
            area_sqm: offer
                .get("totalArea")
                .and_then(numeric_value)
                .unwrap_or(0.0),
            rooms: offer
                .get("roomsCount")
                .and_then(Value::as_i64)
                .map(|n| n.to_string()),
            floor: offer
                .get("floorNumber")
                .and_then(Value::as_i64)
                .map(|n| n as i32),
            total_floors: offer
                .pointer("/building/floorsCount")
                .and_then(Value::as_i64)
                .map(|n| n as i32),
            source: Source::Cian,
            source_id: format!("cian_{cian_id}"),
            url: offer
                .get("fullUrl")
                .and_then(Value::as_str)
                .map(str::to_string),
            images: offer
                .get("photos")
                .and_then(Value::as_array)
                .map(|photos| {
                    photos
                        .iter()
                        .filter_map(|p| p.get("fullUrl").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            features,
            scraped_at: Utc::now(),
        })
    }

    fn parse_listing_html(&self, html: &str, url: &str) -> Option<NormalizedListing> {
        let document = Html::parse_document(html);

        let price_selector = Selector::parse(r#"[data-testid="price-amount"]"#).ok()?;
        let title_selector = Selector::parse("h1").ok()?;
        let address_selector = Selector::parse(r#"[data-name="Geo"]"#).ok()?;
        let summary_selector =
            Selector::parse(r#"[data-testid="object-summary-description-info"]"#).ok()?;
        let gallery_selector = Selector::parse(r#"[data-name="Gallery"] img"#).ok()?;

        let price = document
            .select(&price_selector)
            .next()
            .and_then(|el| digits_only(&el.text().collect::<String>()))
            .unwrap_or(0.0);

        let title = document
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Квартира".to_string());

        let address = document
            .select(&address_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let area_sqm = document
            .select(&summary_selector)
            .next()
            .and_then(|el| number_before(&el.text().collect::<String>(), "м²"))
            .unwrap_or(0.0);

        let images: Vec<String> = document
            .select(&gallery_selector)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| !src.is_empty())
            .map(str::to_string)
            .take(10)
            .collect();

        let source_id = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|tail| !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()))
            .map(|id| format!("cian_{id}"))
            .unwrap_or_else(|| format!("cian_{}", stable_hash(url)));

        Some(NormalizedListing {
            title,
            description: String::new(),
            price,
            currency: "RUB".to_string(),
            address,
            latitude: None,
            longitude: None,
            area_sqm,
            rooms: None,
            floor: None,
            total_floors: None,
            source: Source::Cian,
            source_id,
            url: Some(url.to_string()),
            images,
            features: HashMap::new(),
            scraped_at: Utc::now(),
        })
    }
}

#[async_trait]
impl SourceAdapter for CianAdapter {
    async fn search_listings(&self, filters: &SearchFilters, page: u32) -> Vec<NormalizedListing> {
        let Some(client) = &self.client else {
            debug!("CIAN adapter has no live transport, serving mock data");
            return self.generate_mock_data(MOCK_BATCH);
        };

        self.limiter.wait().await;

        let response = client
            .get(SEARCH_URL)
            .query(&Self::search_params(filters, page))
            .headers(Self::headers())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let body = response.json::<Value>().await.map_err(anyhow::Error::from);
                self.listings_from_search_response(status, body)
            }
            Err(e) => {
                warn!("CIAN search request failed: {e}");
                self.generate_mock_data(MOCK_BATCH)
            }
        }
    }

    async fn parse_listing(&self, url: &str) -> Option<NormalizedListing> {
        let Some(client) = &self.client else {
            return self.generate_mock_data(1).into_iter().next();
        };

        self.limiter.wait().await;

        let response = client.get(url).headers(Self::headers()).send().await;
        match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(html) => {
                    debug!("downloaded {} bytes from CIAN listing page", html.len());
                    self.parse_listing_html(&html, url)
                }
                Err(e) => {
                    warn!("failed to read CIAN listing body: {e}");
                    None
                }
            },
            Ok(response) => {
                warn!("CIAN listing returned {}", response.status());
                None
            }
            Err(e) => {
                warn!("CIAN listing request failed: {e}");
                None
            }
        }
    }

    fn source(&self) -> Source {
        Source::Cian
    }

    fn generate_mock_data(&self, count: usize) -> Vec<NormalizedListing> {
        const TITLES: [&str; 5] = [
            "Квартира в ЖК Mantera Residence",
            "Апартаменты с видом на море",
            "Пентхаус в центре Сочи",
            "Студия в Красной Поляне",
            "3-комн. квартира в Адлере",
        ];
        const ADDRESSES: [&str; 5] = [
            "ул. Виноградная, 15, Сочи",
            "Курортный проспект, 100, Сочи",
            "ул. Горького, 45, Сочи",
            "ул. Олимпийская, 12, Красная Поляна",
            "ул. Ленина, 50, Адлер",
        ];
        const ROOMS: [&str; 5] = ["Студия", "1", "2", "3", "4+"];

        (0..count)
            .map(|i| {
                let slot = i % TITLES.len();
                NormalizedListing {
                    title: TITLES[slot].to_string(),
                    description: "Синтетическое объявление ЦИАН (источник недоступен)".to_string(),
                    price: 15_000_000.0 + i as f64 * 7_500_000.0,
                    currency: "RUB".to_string(),
                    address: ADDRESSES[slot].to_string(),
                    latitude: Some(43.585 + slot as f64 * 0.008),
                    longitude: Some(39.720 + slot as f64 * 0.008),
                    area_sqm: 40.0 + i as f64 * 25.0,
                    rooms: Some(ROOMS[slot].to_string()),
                    floor: Some((i % 18 + 2) as i32),
                    total_floors: Some((i % 10 + 12) as i32),
                    source: Source::Cian,
                    source_id: format!("{MOCK_TAG}_{}", i + 1),
                    url: Some(format!("https://cian.ru/sale/flat/90000{}/", i + 1)),
                    images: vec![],
                    features: HashMap::from([("source".to_string(), json!(MOCK_TAG))]),
                    scraped_at: Utc::now(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_payload() -> Value {
        json!({
            "data": {
                "offersSerialized": [
                    {
                        "cianId": 123456,
                        "title": "2-комн. квартира, 54 м²",
                        "description": "Видовая квартира",
                        "bargainTerms": { "priceRur": 18_500_000 },
                        "geo": {
                            "address": [{ "fullName": "ул. Орджоникидзе, 17" }],
                            "coordinates": { "lat": 43.5807, "lng": 39.7188 }
                        },
                        "totalArea": "54.0",
                        "roomsCount": 2,
                        "floorNumber": 7,
                        "building": { "floorsCount": 12 },
                        "fullUrl": "https://cian.ru/sale/flat/123456/",
                        "photos": [{ "fullUrl": "https://img.cian.ru/1.jpg" }],
                        "decoration": "fine",
                        "balconiesCount": 1
                    },
                    // Malformed offer: no cianId, must be skipped silently.
                    { "title": "битая запись" }
                ]
            }
        })
    }

    #[test]
    fn search_results_are_normalized_and_bad_offers_skipped() {
        let adapter = CianAdapter::offline();
        let listings = adapter.parse_search_results(&search_payload());

        assert_eq!(listings.len(), 1);
        let listing = &listings[0];
        assert_eq!(listing.source_id, "cian_123456");
        assert_eq!(listing.price, 18_500_000.0);
        assert_eq!(listing.address, "ул. Орджоникидзе, 17");
        assert_eq!(listing.area_sqm, 54.0);
        assert_eq!(listing.rooms.as_deref(), Some("2"));
        assert_eq!(listing.floor, Some(7));
        assert_eq!(listing.total_floors, Some(12));
        assert_eq!(listing.coordinates().unwrap().latitude, 43.5807);
        assert_eq!(listing.images, vec!["https://img.cian.ru/1.jpg"]);
    }

    #[test]
    fn out_of_range_coordinates_fall_back_to_geocoding() {
        let mut payload = search_payload();
        // Swapped lat/lng puts latitude outside [-90, 90]; such a pair must
        // not be persisted, leaving the listing to the geocoder.
        *payload
            .pointer_mut("/data/offersSerialized/0/geo/coordinates")
            .unwrap() = json!({ "lat": 143.5807, "lng": 39.7188 });

        let adapter = CianAdapter::offline();
        let listings = adapter.parse_search_results(&payload);

        assert_eq!(listings.len(), 1);
        assert!(listings[0].coordinates().is_none());
    }

    #[test]
    fn blocked_response_degrades_to_exactly_five_mocks() {
        let adapter = CianAdapter::offline();
        let listings = adapter
            .listings_from_search_response(StatusCode::FORBIDDEN, Ok(json!({})));

        assert_eq!(listings.len(), 5);
        for listing in &listings {
            assert!(listing.source_id.starts_with(MOCK_TAG));
            assert_eq!(listing.source, Source::Cian);
        }
    }

    #[test]
    fn rate_limited_response_also_degrades_to_mocks() {
        let adapter = CianAdapter::offline();
        let listings = adapter
            .listings_from_search_response(StatusCode::TOO_MANY_REQUESTS, Ok(json!({})));
        assert_eq!(listings.len(), 5);
    }

    #[test]
    fn ok_response_with_empty_offer_list_stays_empty() {
        let adapter = CianAdapter::offline();
        let listings = adapter.listings_from_search_response(
            StatusCode::OK,
            Ok(json!({ "data": { "offersSerialized": [] } })),
        );
        assert!(listings.is_empty());
    }

    #[tokio::test]
    async fn offline_adapter_serves_deterministic_mocks() {
        let adapter = CianAdapter::offline();
        let first = adapter.search_listings(&SearchFilters::default(), 1).await;
        let second = adapter.search_listings(&SearchFilters::default(), 1).await;

        assert_eq!(first.len(), 5);
        let first_ids: Vec<_> = first.iter().map(|l| l.source_id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|l| l.source_id.clone()).collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(first_ids[0], "cian_mock_1");
    }

    #[test]
    fn listing_html_extraction_tolerates_missing_fields() {
        let adapter = CianAdapter::offline();
        let html = r#"
            <html><body>
                <h1>2-комн. квартира, 54,3 м²</h1>
                <div data-testid="price-amount">18 500 000 ₽</div>
                <div data-name="Geo">Сочи, ул. Орджоникидзе, 17</div>
                <div data-testid="object-summary-description-info">Общая площадь 54,3 м²</div>
            </body></html>
        "#;
        let listing = adapter
            .parse_listing_html(html, "https://cian.ru/sale/flat/123456/")
            .unwrap();

        assert_eq!(listing.price, 18_500_000.0);
        assert_eq!(listing.area_sqm, 54.3);
        assert_eq!(listing.address, "Сочи, ул. Орджоникидзе, 17");
        assert_eq!(listing.source_id, "cian_123456");
        assert!(listing.images.is_empty());

        // A page with nothing recognizable still yields a record with
        // defaulted fields and a stable hash id.
        let sparse = adapter
            .parse_listing_html("<html></html>", "https://cian.ru/sale/flat/oddly-shaped/")
            .unwrap();
        assert_eq!(sparse.price, 0.0);
        assert_eq!(sparse.title, "Квартира");
        assert!(sparse.source_id.starts_with("cian_"));
    }
}
