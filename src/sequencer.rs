use crate::catalog::{CreatedProduct, Product};
use crate::shopify::collections::{self, match_collection};
use crate::shopify::config::TAXONOMY_CATEGORY;
use crate::shopify::description::markdown_to_html;
use crate::shopify::inventory::{
    enable_tracking, fetch_first_variant, format_price, inventory_tracked, set_on_hand,
    update_variant_price,
};
use crate::shopify::products::{attach_media, create_default_option, create_product};
use crate::shopify::publications::publish;
use crate::shopify::staged::{staged_filename, upload_image};
use crate::shopify::{LookupCache, ShopifyClient, ShopifyError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use std::{env, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

const ON_HAND_QUANTITY: i64 = 1;

/// Turns one approved [`Product`] into a live store product: create the shell,
/// then populate it through five concurrent branches.
#[derive(Clone)]
pub struct Sequencer {
    client: ShopifyClient,
    cache: Arc<LookupCache>,
    config: Arc<SequencerConfig>,
}

impl Sequencer {
    pub fn new(client: ShopifyClient, config: SequencerConfig) -> Self {
        Self {
            client,
            cache: Arc::new(LookupCache::new()),
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> Self {
        Self::new(ShopifyClient::from_env(), SequencerConfig::from_env())
    }

    pub async fn materialize(&self, product: Product) -> Result<Materialized, MaterializeError> {
        product.validate().map_err(MaterializeError::Invalid)?;

        let description_html = markdown_to_html(&product.description);
        let created = create_product(
            &self.client,
            &product.title,
            &description_html,
            &self.config.taxonomy_category,
        )
        .await
        .map_err(MaterializeError::Create)?;

        let product = Arc::new(product);
        let handles = Branch::ALL
            .into_iter()
            .map(|branch| {
                let sequencer = self.clone();
                let product = Arc::clone(&product);
                let product_id = created.id.clone();
                tokio::spawn(async move {
                    sequencer.run_branch(branch, &product_id, &product).await
                })
            })
            .collect::<Vec<_>>();

        let branches: Vec<BranchReport> = Branch::ALL
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(branch, joined)| {
                joined.unwrap_or_else(|err| {
                    BranchReport::failed(branch, 0, format!("branch task aborted: {err}"))
                })
            })
            .collect();

        let failed = branches.iter().filter(|report| report.is_failed()).count();
        if failed > 0 {
            warn!(
                target = "atelier.sequencer",
                product_id = %created.id,
                failed,
                "product_partially_materialized"
            );
            return Err(MaterializeError::Partial {
                product: created,
                branches,
            });
        }

        info!(
            target = "atelier.sequencer",
            product_id = %created.id,
            title = %created.title,
            "product_materialized"
        );
        Ok(Materialized {
            product: created,
            branches,
        })
    }

    async fn run_branch(
        &self,
        branch: Branch,
        product_id: &str,
        product: &Product,
    ) -> BranchReport {
        let started = Instant::now();
        let result = match branch {
            Branch::Options => self.options(product_id).await,
            Branch::VariantInventory => self.variant_inventory(product_id, product.price).await,
            Branch::Publication => self.publication(product_id).await,
            Branch::Collection => self.collection(product_id, product.category.as_str()).await,
            Branch::Media => self.media(product_id, product).await,
        };
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::branch_elapsed(branch.as_str(), elapsed_ms);

        match result {
            Ok(output) => BranchReport::ok(branch, elapsed_ms, output),
            Err(err) => {
                warn!(
                    target = "atelier.sequencer",
                    product_id,
                    branch = branch.as_str(),
                    error = %err,
                    "branch_failed"
                );
                BranchReport::failed(branch, elapsed_ms, err.to_string())
            }
        }
    }

    async fn options(&self, product_id: &str) -> Result<Value, ShopifyError> {
        create_default_option(&self.client, product_id).await?;
        Ok(json!({ "option": "Title", "value": "Default Title" }))
    }

    /// Strictly serial: each step needs the store state the previous one produced.
    async fn variant_inventory(&self, product_id: &str, price: f64) -> Result<Value, ShopifyError> {
        let variant = fetch_first_variant(&self.client, product_id).await?;
        let updated = update_variant_price(&self.client, product_id, &variant.id, price).await?;
        let item = updated
            .inventory_item
            .or(variant.inventory_item)
            .ok_or_else(|| {
                ShopifyError::MissingPrerequisite(format!(
                    "variant {} has no inventory item",
                    variant.id
                ))
            })?;

        enable_tracking(&self.client, &item.id).await?;
        self.settle(&item.id).await?;

        let location = self.cache.primary_location(&self.client).await?;
        set_on_hand(&self.client, &item.id, &location.id, ON_HAND_QUANTITY).await?;

        Ok(json!({
            "variant_id": variant.id,
            "price": format_price(price),
            "inventory_item_id": item.id,
            "location_id": location.id,
            "on_hand": ON_HAND_QUANTITY,
        }))
    }

    /// Waits for tracking enablement to propagate before quantities are set.
    async fn settle(&self, inventory_item_id: &str) -> Result<(), ShopifyError> {
        match self.config.settle {
            SettleStrategy::Fixed(delay) => {
                sleep(delay).await;
                Ok(())
            }
            SettleStrategy::Poll { interval, timeout } => {
                let started = tokio::time::Instant::now();
                loop {
                    if inventory_tracked(&self.client, inventory_item_id).await? {
                        return Ok(());
                    }
                    if started.elapsed() >= timeout {
                        warn!(
                            target = "atelier.sequencer",
                            inventory_item_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "inventory_tracking_not_confirmed"
                        );
                        return Ok(());
                    }
                    sleep(interval).await;
                }
            }
        }
    }

    async fn publication(&self, product_id: &str) -> Result<Value, ShopifyError> {
        let publication = self.cache.online_store(&self.client).await?;
        publish(&self.client, product_id, &publication.id).await?;
        Ok(json!({ "publication_id": publication.id }))
    }

    async fn collection(&self, product_id: &str, category: &str) -> Result<Value, ShopifyError> {
        let all = self.cache.collections(&self.client).await?;
        let Some(collection) = match_collection(all, category) else {
            info!(
                target = "atelier.sequencer",
                product_id,
                category,
                "no_matching_collection"
            );
            return Ok(json!({ "skipped": true, "category": category }));
        };
        collections::add_product(&self.client, &collection.id, product_id).await?;
        Ok(json!({ "collection_id": collection.id, "title": collection.title }))
    }

    /// Uploads fan out per image; attachments then follow the original image
    /// order so the first image becomes the featured one. A failed image is
    /// skipped and reported with the others.
    async fn media(&self, product_id: &str, product: &Product) -> Result<Value, ShopifyError> {
        let total = product.images.len();
        let uploads = product.images.iter().enumerate().map(|(position, image)| {
            let filename = staged_filename(&product.title, position, image.extension());
            async move {
                let result = upload_image(&self.client, image, &filename).await;
                (filename, result)
            }
        });
        let staged = join_all(uploads).await;

        let mut attached = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (filename, upload) in staged {
            let outcome = match upload {
                Ok(resource_url) => attach_media(&self.client, product_id, &resource_url)
                    .await
                    .map(|_| resource_url),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(resource_url) => attached.push(resource_url),
                Err(err) => failures.push(format!("{filename}: {err}")),
            }
        }

        if !failures.is_empty() {
            return Err(ShopifyError::Media {
                failed: failures.len(),
                total,
                details: failures.join("; "),
            });
        }
        Ok(json!({ "attached": attached.len(), "resource_urls": attached }))
    }
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub taxonomy_category: String,
    pub settle: SettleStrategy,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            taxonomy_category: TAXONOMY_CATEGORY.clone(),
            settle: SettleStrategy::default(),
        }
    }
}

impl SequencerConfig {
    pub fn from_env() -> Self {
        Self {
            taxonomy_category: TAXONOMY_CATEGORY.clone(),
            settle: SettleStrategy::from_env(),
        }
    }
}

/// How the variant branch waits between enabling tracking and setting stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleStrategy {
    Fixed(Duration),
    /// Re-reads the tracked flag until it reports enabled. On timeout the
    /// branch proceeds anyway.
    Poll { interval: Duration, timeout: Duration },
}

impl Default for SettleStrategy {
    fn default() -> Self {
        SettleStrategy::Fixed(Duration::from_millis(1000))
    }
}

impl SettleStrategy {
    pub fn from_env() -> Self {
        let mode = env::var("INVENTORY_SETTLE").unwrap_or_default();
        if mode.trim().eq_ignore_ascii_case("poll") {
            SettleStrategy::Poll {
                interval: millis_from_env("INVENTORY_POLL_INTERVAL_MS", 250),
                timeout: millis_from_env("INVENTORY_POLL_TIMEOUT_MS", 10_000),
            }
        } else {
            SettleStrategy::Fixed(millis_from_env("INVENTORY_SETTLE_MS", 1000))
        }
    }
}

fn millis_from_env(key: &str, default: u64) -> Duration {
    let millis = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_millis(millis)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Options,
    VariantInventory,
    Publication,
    Collection,
    Media,
}

impl Branch {
    pub const ALL: [Branch; 5] = [
        Branch::Options,
        Branch::VariantInventory,
        Branch::Publication,
        Branch::Collection,
        Branch::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Options => "options",
            Branch::VariantInventory => "variant_inventory",
            Branch::Publication => "publication",
            Branch::Collection => "collection",
            Branch::Media => "media",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub branch: Branch,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: BranchOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchOutcome {
    Ok { output: Value },
    Failed { error: String },
}

impl BranchReport {
    fn ok(branch: Branch, elapsed_ms: u128, output: Value) -> Self {
        Self {
            branch,
            elapsed_ms,
            timestamp: Utc::now(),
            outcome: BranchOutcome::Ok { output },
        }
    }

    fn failed(branch: Branch, elapsed_ms: u128, error: String) -> Self {
        Self {
            branch,
            elapsed_ms,
            timestamp: Utc::now(),
            outcome: BranchOutcome::Failed { error },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, BranchOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            BranchOutcome::Failed { error } => Some(error),
            BranchOutcome::Ok { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Materialized {
    pub product: CreatedProduct,
    pub branches: Vec<BranchReport>,
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("invalid product: {0}")]
    Invalid(String),
    #[error("product creation failed: {0}")]
    Create(ShopifyError),
    /// The shell exists on the store and is left live; the id is kept for
    /// manual cleanup.
    #[error("product {} created but {}", .product.id, describe_failures(.branches))]
    Partial {
        product: CreatedProduct,
        branches: Vec<BranchReport>,
    },
}

impl MaterializeError {
    pub fn product(&self) -> Option<&CreatedProduct> {
        match self {
            MaterializeError::Partial { product, .. } => Some(product),
            _ => None,
        }
    }
}

fn describe_failures(branches: &[BranchReport]) -> String {
    branches
        .iter()
        .filter_map(|report| {
            report
                .error()
                .map(|error| format!("{} failed: {error}", report.branch.as_str()))
        })
        .collect::<Vec<_>>()
        .join("; ")
}
