use crate::shopify::{ShopifyClient, ShopifyError, UserError, ensure_no_user_errors};
use serde::Deserialize;
use serde_json::json;

const COLLECTIONS: &str = r#"
query collections {
  collections(first: 50) { nodes { id title handle } }
}"#;

const COLLECTION_ADD_PRODUCTS: &str = r#"
mutation collectionAddProducts($id: ID!, $productIds: [ID!]!) {
  collectionAddProducts(id: $id, productIds: $productIds) {
    collection { id title }
    userErrors { field message }
  }
}"#;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Collection {
    pub id: String,
    pub title: String,
    pub handle: String,
}

#[derive(Debug, Deserialize)]
struct CollectionsData {
    collections: CollectionNodes,
}

#[derive(Debug, Deserialize)]
struct CollectionNodes {
    nodes: Vec<Collection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddProductsData {
    collection_add_products: AddProductsPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddProductsPayload {
    #[serde(default)]
    user_errors: Vec<UserError>,
}

pub async fn fetch_collections(client: &ShopifyClient) -> Result<Vec<Collection>, ShopifyError> {
    let data: CollectionsData = client.request(COLLECTIONS, json!({})).await?;
    Ok(data.collections.nodes)
}

/// Case-insensitive title/handle equality first, then containment in either
/// direction. Returns the first hit in listing order.
pub fn match_collection<'a>(
    collections: &'a [Collection],
    category: &str,
) -> Option<&'a Collection> {
    let needle = category.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let exact = collections.iter().find(|collection| {
        collection.title.to_lowercase() == needle || collection.handle.to_lowercase() == needle
    });
    if exact.is_some() {
        return exact;
    }

    collections.iter().find(|collection| {
        [&collection.title, &collection.handle].into_iter().any(|field| {
            let field = field.to_lowercase();
            !field.is_empty() && (field.contains(&needle) || needle.contains(&field))
        })
    })
}

pub async fn add_product(
    client: &ShopifyClient,
    collection_id: &str,
    product_id: &str,
) -> Result<(), ShopifyError> {
    let data: AddProductsData = client
        .request(
            COLLECTION_ADD_PRODUCTS,
            json!({ "id": collection_id, "productIds": [product_id] }),
        )
        .await?;
    ensure_no_user_errors("collectionAddProducts", &data.collection_add_products.user_errors)
}
