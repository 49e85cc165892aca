use crate::catalog::CreatedProduct;
use crate::shopify::{ShopifyClient, ShopifyError, UserError, ensure_no_user_errors};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

const PRODUCT_CREATE: &str = r#"
mutation productCreate($product: ProductCreateInput!) {
  productCreate(product: $product) {
    product { id title handle }
    userErrors { field message }
  }
}"#;

const PRODUCT_OPTIONS_CREATE: &str = r#"
mutation productOptionsCreate($productId: ID!, $options: [OptionCreateInput!]!) {
  productOptionsCreate(productId: $productId, options: $options) {
    product { id options { id name optionValues { id name } } }
    userErrors { field message }
  }
}"#;

const PRODUCT_ATTACH_MEDIA: &str = r#"
mutation productUpdate($product: ProductUpdateInput!, $media: [CreateMediaInput!]!) {
  productUpdate(product: $product, media: $media) {
    product { id media(first: 10) { nodes { id } } }
    userErrors { field message }
  }
}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductCreateData {
    product_create: MutationPayload<CreatedProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductOptionsData {
    product_options_create: MutationPayload<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductUpdateData {
    product_update: MutationPayload<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationPayload<T> {
    product: Option<T>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

/// Creates the ACTIVE product shell. `description_html` is already sanitized.
pub async fn create_product(
    client: &ShopifyClient,
    title: &str,
    description_html: &str,
    taxonomy_category: &str,
) -> Result<CreatedProduct, ShopifyError> {
    let data: ProductCreateData = client
        .request(
            PRODUCT_CREATE,
            json!({
                "product": {
                    "title": title,
                    "descriptionHtml": description_html,
                    "category": taxonomy_category,
                    "status": "ACTIVE",
                }
            }),
        )
        .await?;
    let payload = data.product_create;
    ensure_no_user_errors("productCreate", &payload.user_errors)?;
    let product = payload.product.ok_or_else(|| {
        ShopifyError::MissingPrerequisite("productCreate returned no product".into())
    })?;
    info!(
        target = "atelier.shopify",
        product_id = %product.id,
        handle = %product.handle,
        "product_created"
    );
    Ok(product)
}

/// Single `Title` option with the one `Default Title` value.
pub async fn create_default_option(
    client: &ShopifyClient,
    product_id: &str,
) -> Result<(), ShopifyError> {
    let data: ProductOptionsData = client
        .request(
            PRODUCT_OPTIONS_CREATE,
            json!({
                "productId": product_id,
                "options": [{ "name": "Title", "values": [{ "name": "Default Title" }] }],
            }),
        )
        .await?;
    ensure_no_user_errors("productOptionsCreate", &data.product_options_create.user_errors)
}

pub async fn attach_media(
    client: &ShopifyClient,
    product_id: &str,
    resource_url: &str,
) -> Result<(), ShopifyError> {
    let data: ProductUpdateData = client
        .request(
            PRODUCT_ATTACH_MEDIA,
            json!({
                "product": { "id": product_id },
                "media": [{ "mediaContentType": "IMAGE", "originalSource": resource_url }],
            }),
        )
        .await?;
    ensure_no_user_errors("productUpdate", &data.product_update.user_errors)
}
