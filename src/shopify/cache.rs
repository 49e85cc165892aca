use crate::shopify::collections::{Collection, fetch_collections};
use crate::shopify::inventory::{Location, fetch_primary_location};
use crate::shopify::publications::{Publication, fetch_online_store};
use crate::shopify::{ShopifyClient, ShopifyError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Store facts that do not change while the process runs. Each is fetched
/// at most once; concurrent first callers wait on the same fetch and a failed
/// fetch leaves the slot empty for the next caller.
#[derive(Debug, Default)]
pub struct LookupCache {
    location: OnceCell<Location>,
    collections: OnceCell<Vec<Collection>>,
    publication: OnceCell<Publication>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn primary_location(
        &self,
        client: &ShopifyClient,
    ) -> Result<&Location, ShopifyError> {
        self.location
            .get_or_try_init(|| async {
                let location = fetch_primary_location(client).await?;
                debug!(
                    target = "atelier.shopify",
                    location_id = %location.id,
                    name = %location.name,
                    "location_cached"
                );
                Ok::<_, ShopifyError>(location)
            })
            .await
    }

    pub async fn collections(&self, client: &ShopifyClient) -> Result<&[Collection], ShopifyError> {
        let collections = self
            .collections
            .get_or_try_init(|| async {
                let collections = fetch_collections(client).await?;
                debug!(target = "atelier.shopify", count = collections.len(), "collections_cached");
                Ok::<_, ShopifyError>(collections)
            })
            .await?;
        Ok(collections.as_slice())
    }

    pub async fn online_store(&self, client: &ShopifyClient) -> Result<&Publication, ShopifyError> {
        self.publication
            .get_or_try_init(|| async {
                let publication = fetch_online_store(client).await?;
                debug!(
                    target = "atelier.shopify",
                    publication_id = %publication.id,
                    "publication_cached"
                );
                Ok::<_, ShopifyError>(publication)
            })
            .await
    }
}
