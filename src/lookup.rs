//! Energy density lookup in the Open Food Facts product database.
//!
//! Searches are retried on transient failures according to a [`RetryPolicy`].
//! Products without a name or without usable energy data are skipped; energy
//! given only in kJ is converted to kcal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::MAX_CALORIES_PER_100G;
use crate::error::LookupError;

/// Maximum number of candidates offered for one search.
pub const MAX_CANDIDATES: usize = 4;

const SEARCH_URL: &str = "https://world.openfoodfacts.org/cgi/search.pl";
const USER_AGENT: &str = concat!("calorie-companion/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const KJ_PER_KCAL: f64 = 4.184;

/// A product found in the food database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodCandidate {
    pub name: String,
    pub calories_per_100g: u32,
}

/// A searchable source of product energy densities.
#[async_trait]
pub trait FoodLookup: Send + Sync {
    /// Runs one search attempt for an already normalized query.
    async fn search(&self, query: &str) -> Result<Vec<FoodCandidate>, LookupError>;
}

/// How often and how patiently a search is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Searches `lookup` for `query`, retrying transient failures.
///
/// An empty list means the database answered but had nothing usable.
pub async fn lookup_food_calories(
    lookup: &dyn FoodLookup,
    query: &str,
    policy: RetryPolicy,
) -> Result<Vec<FoodCandidate>, LookupError> {
    let query = normalize_query(query);
    if query.is_empty() {
        return Err(LookupError::EmptyQuery);
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match lookup.search(&query).await {
            Ok(candidates) => {
                log::info!(
                    "Food search for '{}' returned {} candidates (attempt {}/{})",
                    query,
                    candidates.len(),
                    attempt,
                    max_attempts
                );
                return Ok(candidates);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                log::warn!(
                    "Food search attempt {}/{} for '{}' failed: {}. Retrying in {:?}",
                    attempt,
                    max_attempts,
                    query,
                    e,
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                log::error!(
                    "Food search for '{}' failed after {} attempts: {}",
                    query,
                    attempt,
                    e
                );
                return Err(e);
            }
        }
    }
}

/// Lower-cases the query, turns decimal commas into points, drops percent
/// signs and collapses whitespace.
fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .replace(',', ".")
        .replace('%', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// HTTP client for the public Open Food Facts search endpoint.
pub struct OpenFoodFacts {
    client: Client,
    search_url: String,
}

impl OpenFoodFacts {
    pub fn new() -> Result<Self, LookupError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            search_url: SEARCH_URL.to_string(),
        })
    }
}

#[async_trait]
impl FoodLookup for OpenFoodFacts {
    async fn search(&self, query: &str) -> Result<Vec<FoodCandidate>, LookupError> {
        // One extra in case a product has no usable energy data
        let page_size = (MAX_CANDIDATES + 1).to_string();

        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("search_terms", query),
                ("search_simple", "1"),
                ("action", "process"),
                ("json", "1"),
                ("fields", "product_name,nutriments"),
                ("page_size", page_size.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }

        let body = response.text().await?;
        parse_search_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    products: Vec<ProductHit>,
}

#[derive(Debug, Deserialize)]
struct ProductHit {
    product_name: Option<String>,
    #[serde(default)]
    nutriments: Map<String, Value>,
}

/// Extracts at most [`MAX_CANDIDATES`] usable products from a search response.
pub fn parse_search_response(body: &str) -> Result<Vec<FoodCandidate>, LookupError> {
    let response: SearchResponse = serde_json::from_str(body)?;

    Ok(response
        .products
        .iter()
        .filter_map(parse_product)
        .take(MAX_CANDIDATES)
        .collect())
}

fn parse_product(product: &ProductHit) -> Option<FoodCandidate> {
    let name = product.product_name.as_deref().map(str::trim)?;
    if name.is_empty() {
        return None;
    }

    // Numbers sometimes arrive as strings
    let number = |key: &str| -> Option<f64> {
        product.nutriments.get(key).and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
    };

    let kcal = number("energy-kcal_100g")
        .filter(|kcal| *kcal > 0.0)
        .or_else(|| {
            let energy = number("energy_100g").filter(|energy| *energy > 0.0)?;
            let unit = product
                .nutriments
                .get("energy_unit")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            match unit.as_str() {
                "kcal" => Some(energy),
                "kj" | "" => Some(energy / KJ_PER_KCAL),
                _ => None,
            }
        });

    let Some(kcal) = kcal.filter(|kcal| kcal.is_finite()) else {
        log::debug!("No energy data for '{}', skipped", name);
        return None;
    };
    if kcal > MAX_CALORIES_PER_100G as f64 {
        log::debug!("Implausible {} kcal/100g for '{}', skipped", kcal, name);
        return None;
    }

    Some(FoodCandidate {
        name: name.to_string(),
        calories_per_100g: kcal as u32,
    })
}
