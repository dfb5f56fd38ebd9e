//! Best-effort product metadata lookup by barcode.
//!
//! One attempt, no retry. Every failure (network, HTTP status, unknown
//! barcode, malformed body) comes back as an empty [`ProductInfo`] so the
//! capture flow never stalls on it.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::LookupSettings;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub barcode: String,
    pub name: String,
    pub ingredients: Option<String>,
    pub allergens: Vec<String>,
    pub brand: Option<String>,
    pub image_url: Option<String>,
}

impl ProductInfo {
    pub fn empty(barcode: &str) -> Self {
        Self {
            barcode: barcode.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.ingredients.is_none()
            && self.allergens.is_empty()
            && self.brand.is_none()
    }
}

#[async_trait]
pub trait ProductLookup: Send + Sync {
    /// Never fails; unknown products and errors yield [`ProductInfo::empty`].
    async fn lookup(&self, barcode: &str) -> ProductInfo;
}

/// Open Food Facts v2 product API.
pub struct OpenFoodFactsLookup {
    client: reqwest::Client,
    base_url: Url,
    language: String,
}

impl OpenFoodFactsLookup {
    pub fn new(settings: &LookupSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .user_agent(concat!("lotscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let base_url = Url::parse(settings.base_url.trim())
            .with_context(|| format!("invalid product service url {:?}", settings.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("product service url {} cannot take a path", base_url);
        }

        Ok(Self {
            client,
            base_url,
            language: settings.language.clone(),
        })
    }

    /// The barcode is percent-encoded as a single path segment.
    pub fn product_url(&self, barcode: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("product service url {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(["api", "v2", "product", &format!("{barcode}.json")]);
        Ok(url)
    }

    async fn fetch(&self, barcode: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.product_url(barcode)?)
            .send()
            .await
            .context("product request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("product service returned {status}");
        }

        response
            .json::<Value>()
            .await
            .context("product response was not JSON")
    }
}

#[async_trait]
impl ProductLookup for OpenFoodFactsLookup {
    async fn lookup(&self, barcode: &str) -> ProductInfo {
        let barcode = barcode.trim();
        if barcode.is_empty() {
            return ProductInfo::empty(barcode);
        }

        match self.fetch(barcode).await {
            Ok(body) => match parse_product(barcode, &body, &self.language) {
                Some(product) => {
                    info!("product found for {}: {}", barcode, product.name);
                    product
                }
                None => {
                    info!("product {} not found", barcode);
                    ProductInfo::empty(barcode)
                }
            },
            Err(err) => {
                warn!("product lookup for {} failed: {err:#}", barcode);
                ProductInfo::empty(barcode)
            }
        }
    }
}

/// Lookup that never finds anything; used when lookups are disabled.
pub struct NoLookup;

#[async_trait]
impl ProductLookup for NoLookup {
    async fn lookup(&self, barcode: &str) -> ProductInfo {
        ProductInfo::empty(barcode)
    }
}

/// Maps an Open Food Facts body to [`ProductInfo`]. `None` when the service
/// reports the product as unknown.
pub fn parse_product(barcode: &str, body: &Value, language: &str) -> Option<ProductInfo> {
    if body.get("status").and_then(Value::as_i64) != Some(1) {
        return None;
    }
    let product = body.get("product")?.as_object()?;

    let text = |key: &str| -> Option<String> {
        product
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let localized = |key: &str| text(&format!("{key}_{language}")).or_else(|| text(key));

    let allergens = product
        .get("allergens_tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(strip_language_prefix)
                .filter(|tag| !tag.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(ProductInfo {
        barcode: barcode.to_string(),
        name: localized("product_name").unwrap_or_default(),
        ingredients: localized("ingredients_text"),
        allergens,
        brand: text("brands"),
        image_url: text("image_url"),
    })
}

fn strip_language_prefix(tag: &str) -> String {
    match tag.split_once(':') {
        Some((prefix, rest)) if prefix.len() == 2 => rest.to_string(),
        _ => tag.to_string(),
    }
}
