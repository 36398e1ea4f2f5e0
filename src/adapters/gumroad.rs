//! Gumroad storefront client.
//!
//! In dry-run mode nothing touches the network: listings get a synthetic
//! `dry_run_product_*` receipt and there are no sales to fetch.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CallError, ListingReceipt, SalesRecord, Storefront};
use crate::config::StorefrontConfig;
use crate::domain::Listing;

/// Gumroad API v2 client
pub struct GumroadClient {
    client: reqwest::Client,
    access_token: String,
    api_base: String,
    dry_run: bool,
}

/// Envelope fields shared by every Gumroad response
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProductBody {
    product: Product,
}

#[derive(Debug, Deserialize)]
struct ProductsBody {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct Product {
    id: String,
    #[serde(default)]
    name: String,
    short_url: Option<String>,
    #[serde(default)]
    sales_count: u64,
    #[serde(default)]
    sales_usd_cents: u64,
    #[serde(default)]
    views: u64,
    #[serde(default)]
    refunds: u64,
}

impl From<Product> for SalesRecord {
    fn from(product: Product) -> Self {
        Self {
            product_id: product.id,
            product_name: product.name,
            sales_count: product.sales_count,
            revenue_cents: product.sales_usd_cents,
            views: product.views,
            refunds: product.refunds,
        }
    }
}

impl GumroadClient {
    /// Live client. Requires an access token.
    pub fn new(access_token: impl Into<String>, config: &StorefrontConfig) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            access_token: access_token.into(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            dry_run: false,
        })
    }

    /// Client that simulates every call
    pub fn dry_run(config: &StorefrontConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: String::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            dry_run: true,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn read<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, CallError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), body));
        }

        let value: serde_json::Value = response.json().await?;
        parse_body(status.as_u16(), value)
    }
}

/// Check the envelope, then read the payload
fn parse_body<T: for<'de> Deserialize<'de>>(status: u16, value: serde_json::Value) -> Result<T, CallError> {
    let envelope: Envelope = serde_json::from_value(value.clone())?;
    if !envelope.success {
        return Err(CallError::Rejected {
            status,
            message: envelope
                .message
                .unwrap_or_else(|| "request was not successful".to_string()),
        });
    }
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl Storefront for GumroadClient {
    fn name(&self) -> &str {
        "gumroad"
    }

    async fn create_listing(&self, listing: &Listing) -> Result<ListingReceipt, CallError> {
        if self.dry_run {
            let id = format!("dry_run_product_{}", Uuid::new_v4().simple());
            info!(title = %listing.title, %id, "Dry run, skipping storefront upload");
            return Ok(ListingReceipt {
                url: Some(format!("https://gumroad.com/l/dry-run-{}", id)),
                id,
            });
        }

        debug!(title = %listing.title, price_cents = listing.price_cents, "Creating storefront product");
        let price = listing.price_cents.to_string();
        let response = self
            .client
            .post(format!("{}/products", self.api_base))
            .form(&[
                ("access_token", self.access_token.as_str()),
                ("name", listing.title.as_str()),
                ("description", listing.description.as_str()),
                ("price", price.as_str()),
            ])
            .send()
            .await?;

        let body: ProductBody = Self::read(response).await?;
        Ok(ListingReceipt {
            id: body.product.id,
            url: body.product.short_url,
        })
    }

    async fn fetch_sales_data(&self) -> Result<Vec<SalesRecord>, CallError> {
        if self.dry_run {
            debug!("Dry run, no storefront sales to fetch");
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(format!("{}/products", self.api_base))
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;

        let body: ProductsBody = Self::read(response).await?;
        Ok(body.products.into_iter().map(SalesRecord::from).collect())
    }
}
