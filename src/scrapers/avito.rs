use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER, USER_AGENT,
};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::{NormalizedListing, Source};
use crate::scrapers::rate_limit::RateLimiter;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::SearchFilters;
use crate::scrapers::{checked_coordinates, first_integer, first_number, numeric_value, stable_hash};

const BASE_URL: &str = "https://www.avito.ru";
const SEARCH_URL: &str = "https://www.avito.ru/api/14/items";
const MOCK_TAG: &str = "avito_mock";
const MOCK_BATCH: usize = 5;

// Avito's mobile-API taxonomy: flats category, Sochi location.
const CATEGORY_FLATS: u32 = 24;
const LOCATION_SOCHI: u32 = 637_640;

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Adapter for Avito listings.
///
/// Avito has stronger anti-bot protections than CIAN: requests carry
/// sec-ch-* client hints and randomized tracking cookies, and the rate
/// limiter uses a wider 3-7 s delay window.
pub struct AvitoAdapter {
    /// `None` means no live transport: every operation serves mock data.
    client: Option<Client>,
    limiter: RateLimiter,
}

impl AvitoAdapter {
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
        RateLimiter::new(Duration::from_secs(3), Duration::from_secs(7))
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
            HeaderValue::from_static("application/json, text/javascript, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ru-RU,ru;q=0.9"));
        // Accept-Encoding stays with the client: reqwest advertises the
        // codings it can actually decompress. Setting the header by hand
        // would turn automatic decompression off and hand compressed bytes
        // to the JSON/HTML parsers.
        headers.insert(
            REFERER,
            HeaderValue::from_static("https://www.avito.ru/sochi/kvartiry/prodam-ASgBAgICAUSSA8YQ"),
        );

        let hints = [
            (
                "sec-ch-ua",
                r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#,
            ),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", r#""Windows""#),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
        ];
        for (name, value) in hints {
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                headers.insert(name, HeaderValue::from_static(value));
            }
        }

        // Randomized tracking cookies make the client look like a browser
        // session instead of a fresh scraper.
        let mut rng = rand::thread_rng();
        let cookie = format!(
            "_ym_uid={}; f={}",
            rng.gen_range(100_000_000u64..=999_999_999),
            rng.gen_range(1_000_000_000u64..=9_999_999_999),
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.insert(COOKIE, value);
        }

        headers
    }

    fn search_params(filters: &SearchFilters, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("categoryId", CATEGORY_FLATS.to_string()),
            ("locationId", LOCATION_SOCHI.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(min) = filters.min_price {
            params.push(("priceMin", min.to_string()));
        }
        if let Some(max) = filters.max_price {
            params.push(("priceMax", max.to_string()));
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
                    warn!("Avito response body was not valid JSON: {e}");
                    self.generate_mock_data(MOCK_BATCH)
                }
            },
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Avito rate limit hit (429), serving mock data");
                self.generate_mock_data(MOCK_BATCH)
            }
            StatusCode::FORBIDDEN => {
                warn!("Avito blocked the request (403), proxy rotation needed");
                self.generate_mock_data(MOCK_BATCH)
            }
            other => {
                warn!("Avito API returned {other}, serving mock data");
                self.generate_mock_data(MOCK_BATCH)
            }
        }
    }

    fn parse_search_results(&self, data: &Value) -> Vec<NormalizedListing> {
        let Some(items) = data.pointer("/result/items").and_then(Value::as_array) else {
            warn!("Avito payload is missing result.items");
            return Vec::new();
        };

        items
            .iter()
            // Promoted blocks and banners share the feed with real items.
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("item"))
            .filter_map(|item| {
                let parsed = Self::parse_item(item.get("value")?);
                if parsed.is_none() {
                    warn!("skipping Avito item that failed field extraction");
                }
                parsed
            })
            .collect()
    }

    fn parse_item(value: &Value) -> Option<NormalizedListing> {
        let avito_id = match value.get("id")? {
            Value::Number(n) => n.to_string(),
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => return None,
        };

        let parameters = value.get("parameters").and_then(Value::as_array);

        let mut features = HashMap::new();
        if let Some(category) = value.pointer("/category/name").filter(|v| !v.is_null()) {
            features.insert("category".to_string(), category.clone());
        }
        if let Some(name) = value.pointer("/seller/name").filter(|v| !v.is_null()) {
            features.insert("seller_name".to_string(), name.clone());
        }
        let seller_type = if value
            .pointer("/seller/isOfficial")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            "agency"
        } else {
            "individual"
        };
        features.insert("seller_type".to_string(), json!(seller_type));

        let (latitude, longitude) = checked_coordinates(
            value.pointer("/geo/lat").and_then(Value::as_f64),
            value.pointer("/geo/lng").and_then(Value::as_f64),
        );

        Some(NormalizedListing {
            title: value
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Квартира")
                .to_string(),
            description: value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            price: value
                .pointer("/priceDetailed/value")
                .and_then(numeric_value)
                .unwrap_or(0.0),
            currency: "RUB".to_string(),
            address: value
                .pointer("/location/address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            latitude,
            longitude,
            area_sqm: Self::extract_area(parameters),
            rooms: Self::extract_rooms(parameters),
            floor: Self::extract_floor(parameters),
            total_floors: None,
            source: Source::Avito,
            source_id: format!("avito_{avito_id}"),
            url: value
                .get("uri")
                .and_then(Value::as_str)
                .map(|uri| format!("{BASE_URL}{uri}")),
            images: value
                .get("images")
                .and_then(Value::as_array)
                .map(|images| {
                    images
                        .iter()
                        .filter_map(|img| img.get("640x480").and_then(Value::as_str))
                        .filter(|src| !src.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            features,
            scraped_at: Utc::now(),
        })
    }

    // Avito ships most numeric attributes as localized label/value pairs, so
    // extraction matches on label substrings and pulls the first digit run.

    fn extract_area(parameters: Option<&Vec<Value>>) -> f64 {
        Self::find_parameter(parameters, &["площадь"])
            .and_then(|v| first_number(&v))
            .unwrap_or(0.0)
    }

    fn extract_rooms(parameters: Option<&Vec<Value>>) -> Option<String> {
        Self::find_parameter(parameters, &["комнат", "студия"])
    }

    fn extract_floor(parameters: Option<&Vec<Value>>) -> Option<i32> {
        Self::find_parameter(parameters, &["этаж"])
            .and_then(|v| first_integer(&v))
            .map(|n| n as i32)
    }

    fn find_parameter(parameters: Option<&Vec<Value>>, needles: &[&str]) -> Option<String> {
        parameters?.iter().find_map(|p| {
            let label = p.get("label").and_then(Value::as_str)?.to_lowercase();
            if needles.iter().any(|needle| label.contains(needle)) {
                p.get("value").and_then(Value::as_str).map(str::to_string)
            } else {
                None
            }
        })
    }

    fn parse_listing_html(&self, html: &str, url: &str) -> Option<NormalizedListing> {
        let document = Html::parse_document(html);

        let price_selector = Selector::parse(r#"[itemprop="price"]"#).ok()?;
        let title_selector = Selector::parse("h1").ok()?;
        let address_selector = Selector::parse(r#"[itemprop="address"]"#).ok()?;
        let gallery_selector = Selector::parse(r#"[data-marker="gallery-img-frame"] img"#).ok()?;

        let price = document
            .select(&price_selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .and_then(|content| content.parse::<f64>().ok())
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

        let images: Vec<String> = document
            .select(&gallery_selector)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| !src.is_empty() && !src.contains("placeholder"))
            .map(str::to_string)
            .take(10)
            .collect();

        // Listing URLs end with "_<id>".
        let source_id = url
            .trim_end_matches('/')
            .rsplit('_')
            .next()
            .filter(|tail| !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()))
            .map(|id| format!("avito_{id}"))
            .unwrap_or_else(|| format!("avito_{}", stable_hash(url)));

        Some(NormalizedListing {
            title,
            description: String::new(),
            price,
            currency: "RUB".to_string(),
            address,
            latitude: None,
            longitude: None,
            area_sqm: 0.0,
            rooms: None,
            floor: None,
            total_floors: None,
            source: Source::Avito,
            source_id,
            url: Some(url.to_string()),
            images,
            features: HashMap::new(),
            scraped_at: Utc::now(),
        })
    }
}

#[async_trait]
impl SourceAdapter for AvitoAdapter {
    async fn search_listings(&self, filters: &SearchFilters, page: u32) -> Vec<NormalizedListing> {
        let Some(client) = &self.client else {
            debug!("Avito adapter has no live transport, serving mock data");
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
                warn!("Avito search request failed: {e}");
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
                    debug!("downloaded {} bytes from Avito listing page", html.len());
                    self.parse_listing_html(&html, url)
                }
                Err(e) => {
                    warn!("failed to read Avito listing body: {e}");
                    None
                }
            },
            Ok(response) => {
                warn!("Avito listing returned {}", response.status());
                None
            }
            Err(e) => {
                warn!("Avito listing request failed: {e}");
                None
            }
        }
    }

    fn source(&self) -> Source {
        Source::Avito
    }

    fn generate_mock_data(&self, count: usize) -> Vec<NormalizedListing> {
        const TITLES: [&str; 5] = [
            "2-к квартира в ЖК Горки Город",
            "Студия с ремонтом у моря",
            "3-к квартира в новостройке",
            "Апартаменты в Имеретинской бухте",
            "1-к квартира в Адлере",
        ];
        const ADDRESSES: [&str; 5] = [
            "Сочи, Адлерский р-н, ул. Ленина, 50",
            "Сочи, Центральный р-н, ул. Морская, 12",
            "Сочи, Хостинский р-н, ул. Платановая, 8",
            "Красная Поляна, ул. Олимпийская, 25",
            "Сочи, Лазаревский р-н, ул. Победы, 100",
        ];
        const ROOMS: [&str; 5] = ["2", "Студия", "3", "2", "1"];

        (0..count)
            .map(|i| {
                let slot = i % TITLES.len();
                NormalizedListing {
                    title: TITLES[slot].to_string(),
                    description: "Синтетическое объявление Авито (источник недоступен)"
                        .to_string(),
                    price: 8_000_000.0 + i as f64 * 6_000_000.0,
                    currency: "RUB".to_string(),
                    address: ADDRESSES[slot].to_string(),
                    latitude: Some(43.585 - slot as f64 * 0.006),
                    longitude: Some(39.720 + slot as f64 * 0.006),
                    area_sqm: 30.0 + i as f64 * 20.0,
                    rooms: Some(ROOMS[slot].to_string()),
                    floor: Some((i % 12 + 1) as i32),
                    total_floors: Some((i % 8 + 9) as i32),
                    source: Source::Avito,
                    source_id: format!("{MOCK_TAG}_{}", i + 1),
                    url: Some(format!("https://www.avito.ru/sochi/kvartiry/80000{}", i + 1)),
                    images: vec![],
                    features: HashMap::from([
                        ("source".to_string(), json!(MOCK_TAG)),
                        ("seller_type".to_string(), json!("agency")),
                    ]),
                    scraped_at: Utc::now(),
                }
            })
            .collect()
    }
}
