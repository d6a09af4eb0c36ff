//! Product enrichment for accepted scans.
//!
//! Two public product databases are queried in order through the
//! [`ProductProvider`] seam: Open Food Facts first, the UPCitemdb trial
//! endpoint as fallback. Each provider gets one retry after a short backoff
//! on transport or server failure; a well-formed "no such product" answer is
//! definitive and moves straight on. Lookup failures never propagate out of
//! [`ProductClient::lookup`] — the pipeline surfaces them as "no data".

use std::{collections::HashMap, env, thread, time::Duration};

use anyhow::{Context, Result};
use reqwest::{StatusCode, blocking::Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_OFF_URL: &str = "https://world.openfoodfacts.org";
const DEFAULT_UPCDB_URL: &str = "https://api.upcitemdb.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BACKOFF: Duration = Duration::from_millis(250);
/// One retry per provider on top of the initial attempt.
const MAX_RETRIES: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Nutrition {
    pub(crate) energy_kcal: Option<f64>,
    pub(crate) fat_g: Option<f64>,
    pub(crate) carbs_g: Option<f64>,
    pub(crate) protein_g: Option<f64>,
}

impl Nutrition {
    fn is_empty(&self) -> bool {
        self.energy_kcal.is_none()
            && self.fat_g.is_none()
            && self.carbs_g.is_none()
            && self.protein_g.is_none()
    }
}

/// Normalised product record assembled from whichever provider answered.
/// Fields the provider did not supply stay `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProductRecord {
    pub(crate) code: String,
    pub(crate) name: Option<String>,
    pub(crate) brand: Option<String>,
    pub(crate) category: Option<String>,
    pub(crate) origin: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) ingredients: Option<String>,
    pub(crate) nutrition: Option<Nutrition>,
    /// Which provider supplied the record.
    pub(crate) source: String,
}

#[derive(Debug, Error)]
pub(crate) enum LookupError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service answered with status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, PartialEq)]
pub(crate) enum LookupOutcome {
    Found(ProductRecord),
    NotFound,
}

/// One queryable product database.
///
/// `Ok(Some)` is a hit, `Ok(None)` a definitive miss, `Err` a failure worth
/// one retry.
pub(crate) trait ProductProvider: Send {
    fn name(&self) -> &'static str;
    fn fetch(&self, client: &Client, code: &str) -> Result<Option<ProductRecord>, LookupError>;
}

pub(crate) struct ProductClient {
    client: Client,
    providers: Vec<Box<dyn ProductProvider>>,
    retry_backoff: Duration,
}

impl ProductClient {
    /// Build the default provider chain. Endpoints can be redirected through
    /// `SCANLENS_OFF_URL` / `SCANLENS_UPCDB_URL` for tests and self-hosted
    /// mirrors.
    pub(crate) fn from_env() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("scanlens/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let providers: Vec<Box<dyn ProductProvider>> = vec![
            Box::new(OpenFoodFacts {
                base_url: env::var("SCANLENS_OFF_URL")
                    .unwrap_or_else(|_| DEFAULT_OFF_URL.to_string()),
            }),
            Box::new(UpcItemDb {
                base_url: env::var("SCANLENS_UPCDB_URL")
                    .unwrap_or_else(|_| DEFAULT_UPCDB_URL.to_string()),
            }),
        ];

        Ok(Self::with_providers(client, providers, RETRY_BACKOFF))
    }

    pub(crate) fn with_providers(
        client: Client,
        providers: Vec<Box<dyn ProductProvider>>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            client,
            providers,
            retry_backoff,
        }
    }

    /// Query the provider chain for a payload. Returns `NotFound` only when
    /// every provider failed or answered without a product.
    pub(crate) fn lookup(&self, code: &str) -> LookupOutcome {
        for provider in &self.providers {
            let mut attempt = 0u32;
            loop {
                match provider.fetch(&self.client, code) {
                    Ok(Some(record)) => {
                        debug!("{} answered for {code}", provider.name());
                        return LookupOutcome::Found(record);
                    }
                    Ok(None) => {
                        debug!("{} has no listing for {code}", provider.name());
                        break;
                    }
                    Err(err) => {
                        warn!("{} lookup failed for {code}: {err}", provider.name());
                        metrics::counter!("scan_lookup_errors_total", "provider" => provider.name())
                            .increment(1);
                        attempt += 1;
                        if attempt > MAX_RETRIES {
                            break;
                        }
                        thread::sleep(self.retry_backoff);
                    }
                }
            }
        }
        LookupOutcome::NotFound
    }
}

struct OpenFoodFacts {
    base_url: String,
}

impl ProductProvider for OpenFoodFacts {
    fn name(&self) -> &'static str {
        "openfoodfacts"
    }

    fn fetch(&self, client: &Client, code: &str) -> Result<Option<ProductRecord>, LookupError> {
        let url = format!("{}/api/v0/product/{}.json", self.base_url, code);
        let response = client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }
        let body = response.text()?;
        parse_off(code, &body)
    }
}

#[derive(Deserialize)]
struct OffResponse {
    #[serde(default)]
    status: i64,
    product: Option<OffProduct>,
}

#[derive(Deserialize, Default)]
struct OffProduct {
    product_name: Option<String>,
    brands: Option<String>,
    categories: Option<String>,
    countries: Option<String>,
    ingredients_text: Option<String>,
    #[serde(default)]
    nutriments: HashMap<String, Value>,
}

fn parse_off(code: &str, body: &str) -> Result<Option<ProductRecord>, LookupError> {
    let payload: OffResponse = serde_json::from_str(body)?;
    if payload.status != 1 {
        return Ok(None);
    }
    let product = match payload.product {
        Some(product) => product,
        None => return Ok(None),
    };

    let nutrition = Nutrition {
        energy_kcal: nutrient(&product.nutriments, "energy-kcal_100g"),
        fat_g: nutrient(&product.nutriments, "fat_100g"),
        carbs_g: nutrient(&product.nutriments, "carbohydrates_100g"),
        protein_g: nutrient(&product.nutriments, "proteins_100g"),
    };

    Ok(Some(ProductRecord {
        code: code.to_string(),
        name: non_empty(product.product_name),
        brand: non_empty(product.brands),
        category: non_empty(product.categories),
        origin: non_empty(product.countries),
        description: None,
        ingredients: non_empty(product.ingredients_text),
        nutrition: if nutrition.is_empty() {
            None
        } else {
            Some(nutrition)
        },
        source: "openfoodfacts".to_string(),
    }))
}

struct UpcItemDb {
    base_url: String,
}

impl ProductProvider for UpcItemDb {
    fn name(&self) -> &'static str {
        "upcitemdb"
    }

    fn fetch(&self, client: &Client, code: &str) -> Result<Option<ProductRecord>, LookupError> {
        let url = format!("{}/prod/trial/lookup?upc={}", self.base_url, code);
        let response = client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }
        let body = response.text()?;
        parse_upcdb(code, &body)
    }
}

#[derive(Deserialize)]
struct UpcResponse {
    #[serde(default)]
    items: Vec<UpcItem>,
}

#[derive(Deserialize)]
struct UpcItem {
    title: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    description: Option<String>,
}

fn parse_upcdb(code: &str, body: &str) -> Result<Option<ProductRecord>, LookupError> {
    let payload: UpcResponse = serde_json::from_str(body)?;
    let item = match payload.items.into_iter().next() {
        Some(item) => item,
        None => return Ok(None),
    };

    Ok(Some(ProductRecord {
        code: code.to_string(),
        name: non_empty(item.title),
        brand: non_empty(item.brand),
        category: non_empty(item.category),
        origin: None,
        description: non_empty(item.description),
        ingredients: None,
        nutrition: None,
        source: "upcitemdb".to_string(),
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Nutriment values arrive as numbers or numeric strings depending on the
/// product; accept both.
fn nutrient(map: &HashMap<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn record(code: &str, source: &str) -> ProductRecord {
        ProductRecord {
            code: code.to_string(),
            name: Some("Test Product".to_string()),
            brand: None,
            category: None,
            origin: None,
            description: None,
            ingredients: None,
            nutrition: None,
            source: source.to_string(),
        }
    }

    struct ScriptedProvider {
        name: &'static str,
        responses: Mutex<Vec<Result<Option<ProductRecord>, LookupError>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        fn new(
            name: &'static str,
            responses: Vec<Result<Option<ProductRecord>, LookupError>>,
        ) -> (Box<dyn ProductProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Box::new(Self {
                name,
                responses: Mutex::new(responses),
                calls: calls.clone(),
            });
            (provider, calls)
        }
    }

    impl ProductProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn fetch(
            &self,
            _client: &Client,
            _code: &str,
        ) -> Result<Option<ProductRecord>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(None)
            } else {
                responses.remove(0)
            }
        }
    }

    fn server_error() -> LookupError {
        LookupError::Status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn client_with(providers: Vec<Box<dyn ProductProvider>>) -> ProductClient {
        ProductClient::with_providers(Client::new(), providers, Duration::ZERO)
    }

    #[test]
    fn first_provider_hit_short_circuits() {
        let (first, first_calls) = ScriptedProvider::new("first", vec![Ok(Some(record("1", "first")))]);
        let (second, second_calls) = ScriptedProvider::new("second", vec![]);
        let client = client_with(vec![first, second]);

        assert_eq!(
            client.lookup("1"),
            LookupOutcome::Found(record("1", "first"))
        );
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn definitive_miss_falls_through_without_retry() {
        let (first, first_calls) = ScriptedProvider::new("first", vec![Ok(None)]);
        let (second, _) = ScriptedProvider::new("second", vec![Ok(Some(record("1", "second")))]);
        let client = client_with(vec![first, second]);

        assert_eq!(
            client.lookup("1"),
            LookupOutcome::Found(record("1", "second"))
        );
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_retried_once_then_fall_back() {
        let (first, first_calls) =
            ScriptedProvider::new("first", vec![Err(server_error()), Err(server_error())]);
        let (second, _) = ScriptedProvider::new("second", vec![Ok(Some(record("1", "second")))]);
        let client = client_with(vec![first, second]);

        assert_eq!(
            client.lookup("1"),
            LookupOutcome::Found(record("1", "second"))
        );
        assert_eq!(first_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_can_recover_without_touching_fallback() {
        let (first, _) =
            ScriptedProvider::new("first", vec![Err(server_error()), Ok(Some(record("1", "first")))]);
        let (second, second_calls) = ScriptedProvider::new("second", vec![]);
        let client = client_with(vec![first, second]);

        assert_eq!(
            client.lookup("1"),
            LookupOutcome::Found(record("1", "first"))
        );
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn not_found_only_when_every_provider_fails_or_misses() {
        let (first, first_calls) =
            ScriptedProvider::new("first", vec![Err(server_error()), Err(server_error())]);
        let (second, second_calls) = ScriptedProvider::new("second", vec![Ok(None)]);
        let client = client_with(vec![first, second]);

        assert_eq!(client.lookup("1"), LookupOutcome::NotFound);
        assert_eq!(first_calls.load(Ordering::SeqCst), 2);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_response_parses_into_record() {
        let body = r#"{
            "status": 1,
            "product": {
                "product_name": "Nutella",
                "brands": "Ferrero",
                "categories": "Spreads",
                "countries": "Italy",
                "ingredients_text": "Sugar, palm oil, hazelnuts",
                "nutriments": {
                    "energy-kcal_100g": 539,
                    "fat_100g": "30.9",
                    "carbohydrates_100g": 57.5,
                    "proteins_100g": 6.3
                }
            }
        }"#;
        let record = parse_off("3017620422003", body)
            .expect("parses")
            .expect("found");
        assert_eq!(record.name.as_deref(), Some("Nutella"));
        assert_eq!(record.brand.as_deref(), Some("Ferrero"));
        assert_eq!(record.origin.as_deref(), Some("Italy"));
        let nutrition = record.nutrition.expect("nutrition");
        assert_eq!(nutrition.energy_kcal, Some(539.0));
        assert_eq!(nutrition.fat_g, Some(30.9));
        assert_eq!(record.source, "openfoodfacts");
    }

    #[test]
    fn off_status_zero_is_a_definitive_miss() {
        let body = r#"{"status": 0, "status_verbose": "product not found"}"#;
        assert_eq!(parse_off("000", body).expect("parses"), None);
    }

    #[test]
    fn off_empty_strings_become_none() {
        let body = r#"{"status": 1, "product": {"product_name": "", "brands": "  "}}"#;
        let record = parse_off("1", body).expect("parses").expect("found");
        assert_eq!(record.name, None);
        assert_eq!(record.brand, None);
        assert_eq!(record.nutrition, None);
    }

    #[test]
    fn off_garbage_is_malformed() {
        assert!(matches!(
            parse_off("1", "not json"),
            Err(LookupError::Malformed(_))
        ));
    }

    #[test]
    fn upcdb_response_parses_into_record() {
        let body = r#"{
            "code": "OK",
            "total": 1,
            "items": [{
                "title": "Coca-Cola 330ml",
                "brand": "Coca-Cola",
                "category": "Beverages",
                "description": "A can of cola"
            }]
        }"#;
        let record = parse_upcdb("5449000000996", body)
            .expect("parses")
            .expect("found");
        assert_eq!(record.name.as_deref(), Some("Coca-Cola 330ml"));
        assert_eq!(record.description.as_deref(), Some("A can of cola"));
        assert_eq!(record.source, "upcitemdb");
    }

    #[test]
    fn upcdb_empty_items_is_a_miss() {
        let body = r#"{"code": "OK", "total": 0, "items": []}"#;
        assert_eq!(parse_upcdb("000", body).expect("parses"), None);
    }
}
