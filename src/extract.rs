use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::formats::{ProductParameter, ProductRecord};

/// Opaque page-to-data extractor. Both calls may fail or hang; callers
/// apply their own timeouts.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Candidate detail-page URLs found on a catalog page.
    async fn candidate_links(&self, root_url: &Url) -> anyhow::Result<Vec<Url>>;

    /// The product on a detail page, if one could be extracted.
    async fn product(&self, url: &Url) -> anyhow::Result<Option<ProductRecord>>;
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl ExtractorConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("SHOPFORGE_EXTRACTOR_URL")
            .context("SHOPFORGE_EXTRACTOR_URL is required for scraping")?;
        let base_url =
            Url::parse(raw.trim()).context("parse SHOPFORGE_EXTRACTOR_URL")?;
        let timeout_secs = std::env::var("SHOPFORGE_EXTRACT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Talks to an extraction service exposing
/// `POST {base}/catalog {"url"}` -> `{"links": [..]}` and
/// `GET {base}/product?url=..` -> `[record, ..]`.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(config: &ExtractorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build extractor http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.as_str().trim_end_matches('/').to_owned(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CatalogRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    links: Vec<String>,
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn candidate_links(&self, root_url: &Url) -> anyhow::Result<Vec<Url>> {
        let endpoint = format!("{}/catalog", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .header(USER_AGENT, "shopforge/0.1")
            .json(&CatalogRequest {
                url: root_url.as_str(),
            })
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("extractor catalog error ({status}): {body}");
        }
        let body: CatalogResponse = response
            .json()
            .await
            .context("parse extractor catalog response")?;

        let mut links = Vec::with_capacity(body.links.len());
        for raw in body.links {
            match root_url.join(raw.trim()) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => links.push(url),
                Ok(url) => tracing::debug!(%url, "skipping non-http candidate link"),
                Err(err) => tracing::debug!(link = %raw, ?err, "skipping unparsable candidate link"),
            }
        }
        Ok(links)
    }

    async fn product(&self, url: &Url) -> anyhow::Result<Option<ProductRecord>> {
        let endpoint = format!("{}/product", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .query(&[("url", url.as_str())])
            .header(USER_AGENT, "shopforge/0.1")
            .header(ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("GET {endpoint} for {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("extractor product error ({status}): {body}");
        }
        let raw: Vec<RawProduct> = response
            .json()
            .await
            .context("parse extractor product response")?;

        let Some(first) = raw.into_iter().next() else {
            return Ok(None);
        };
        first.validate().map(Some)
    }
}

/// Extractor payload before validation; every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProduct {
    #[serde(default, alias = "externalId")]
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub is_available: Option<bool>,
    pub quantity: Option<u32>,
    pub url: Option<String>,
    pub price_to_show: Option<f64>,
    pub price: Option<f64>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub description: Option<String>,
    pub article_number: Option<String>,
    #[serde(default)]
    pub params: Vec<ProductParameter>,
}

impl RawProduct {
    pub fn validate(self) -> anyhow::Result<ProductRecord> {
        let name = non_blank(self.name).context("product has no name")?;
        let url = non_blank(self.url).context("product has no url")?;
        Url::parse(&url).with_context(|| format!("product url is invalid: {url}"))?;

        let (display_price, list_price) = match (self.price_to_show, self.price) {
            (Some(shown), list) => (shown, list),
            (None, Some(list)) => (list, Some(list)),
            (None, None) => anyhow::bail!("product has no price: {url}"),
        };
        if !display_price.is_finite() || display_price < 0.0 {
            anyhow::bail!("product price is invalid: {display_price}");
        }
        if let Some(list_price) = list_price
            && display_price > list_price
        {
            anyhow::bail!(
                "display price {display_price} exceeds list price {list_price}: {url}"
            );
        }

        Ok(ProductRecord {
            id: None,
            external_id: non_blank(self.id).unwrap_or_else(|| url.clone()),
            name,
            images: self.images,
            is_available: self.is_available.unwrap_or(true),
            quantity: self.quantity.unwrap_or(0),
            url,
            display_price,
            list_price,
            category: self.category.unwrap_or_default(),
            vendor: self.vendor.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            sku: self.article_number.unwrap_or_default(),
            parameters: self.params,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
