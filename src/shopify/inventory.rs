use crate::shopify::{ShopifyClient, ShopifyError, UserError, ensure_no_user_errors};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

const PRODUCT_VARIANT: &str = r#"
query productVariant($productId: ID!) {
  product(id: $productId) {
    variants(first: 1) { nodes { id inventoryItem { id tracked } } }
  }
}"#;

const VARIANTS_BULK_UPDATE: &str = r#"
mutation productVariantsBulkUpdate($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkUpdate(productId: $productId, variants: $variants) {
    productVariants { id price inventoryItem { id tracked } }
    userErrors { field message }
  }
}"#;

const INVENTORY_ITEM_UPDATE: &str = r#"
mutation inventoryItemUpdate($id: ID!, $input: InventoryItemInput!) {
  inventoryItemUpdate(id: $id, input: $input) {
    inventoryItem { id tracked }
    userErrors { field message }
  }
}"#;

const INVENTORY_ITEM_TRACKED: &str = r#"
query inventoryItemTracked($id: ID!) {
  inventoryItem(id: $id) { id tracked }
}"#;

const INVENTORY_SET_QUANTITIES: &str = r#"
mutation inventorySetQuantities($input: InventorySetQuantitiesInput!) {
  inventorySetQuantities(input: $input) {
    inventoryAdjustmentGroup { id }
    userErrors { field message }
  }
}"#;

const PRIMARY_LOCATION: &str = r#"
query primaryLocation {
  locations(first: 10) { nodes { id name isPrimary } }
}"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub inventory_item: Option<InventoryItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    #[serde(default)]
    pub tracked: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ProductVariantData {
    product: Option<VariantsHolder>,
}

#[derive(Debug, Deserialize)]
struct VariantsHolder {
    variants: Nodes<Variant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkUpdateData {
    product_variants_bulk_update: BulkUpdatePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkUpdatePayload {
    #[serde(default)]
    product_variants: Option<Vec<Variant>>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemUpdateData {
    inventory_item_update: UserErrorsOnly,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemTrackedData {
    inventory_item: Option<InventoryItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetQuantitiesData {
    inventory_set_quantities: UserErrorsOnly,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserErrorsOnly {
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct LocationsData {
    locations: Nodes<Location>,
}

/// The variant the platform creates implicitly with every product.
pub async fn fetch_first_variant(
    client: &ShopifyClient,
    product_id: &str,
) -> Result<Variant, ShopifyError> {
    let data: ProductVariantData = client
        .request(PRODUCT_VARIANT, json!({ "productId": product_id }))
        .await?;
    data.product
        .and_then(|product| product.variants.nodes.into_iter().next())
        .ok_or_else(|| {
            ShopifyError::MissingPrerequisite("No existing variant found to update".into())
        })
}

/// Sets the price and forbids overselling. Returns the updated variant.
pub async fn update_variant_price(
    client: &ShopifyClient,
    product_id: &str,
    variant_id: &str,
    price: f64,
) -> Result<Variant, ShopifyError> {
    let data: BulkUpdateData = client
        .request(
            VARIANTS_BULK_UPDATE,
            json!({
                "productId": product_id,
                "variants": [{
                    "id": variant_id,
                    "price": format_price(price),
                    "inventoryPolicy": "DENY",
                }],
            }),
        )
        .await?;
    let payload = data.product_variants_bulk_update;
    ensure_no_user_errors("productVariantsBulkUpdate", &payload.user_errors)?;
    payload
        .product_variants
        .and_then(|variants| variants.into_iter().next())
        .ok_or_else(|| {
            ShopifyError::MissingPrerequisite(
                "productVariantsBulkUpdate returned no variant".into(),
            )
        })
}

pub async fn enable_tracking(
    client: &ShopifyClient,
    inventory_item_id: &str,
) -> Result<(), ShopifyError> {
    let data: ItemUpdateData = client
        .request(
            INVENTORY_ITEM_UPDATE,
            json!({ "id": inventory_item_id, "input": { "tracked": true } }),
        )
        .await?;
    ensure_no_user_errors("inventoryItemUpdate", &data.inventory_item_update.user_errors)?;
    debug!(target = "atelier.shopify", inventory_item_id, "inventory_tracking_enabled");
    Ok(())
}

pub async fn inventory_tracked(
    client: &ShopifyClient,
    inventory_item_id: &str,
) -> Result<bool, ShopifyError> {
    let data: ItemTrackedData = client
        .request(INVENTORY_ITEM_TRACKED, json!({ "id": inventory_item_id }))
        .await?;
    Ok(data.inventory_item.map(|item| item.tracked).unwrap_or(false))
}

/// Absolute on-hand quantity at one location, recorded as an initial stock correction.
pub async fn set_on_hand(
    client: &ShopifyClient,
    inventory_item_id: &str,
    location_id: &str,
    quantity: i64,
) -> Result<(), ShopifyError> {
    let data: SetQuantitiesData = client
        .request(
            INVENTORY_SET_QUANTITIES,
            json!({
                "input": {
                    "name": "on_hand",
                    "reason": "correction",
                    "referenceDocumentUri": "inventory://initial_stock_setting",
                    "ignoreCompareQuantity": true,
                    "quantities": [{
                        "inventoryItemId": inventory_item_id,
                        "locationId": location_id,
                        "quantity": quantity,
                    }],
                }
            }),
        )
        .await?;
    ensure_no_user_errors("inventorySetQuantities", &data.inventory_set_quantities.user_errors)?;
    info!(target = "atelier.shopify", inventory_item_id, location_id, quantity, "inventory_set");
    Ok(())
}

/// Prefers the location flagged primary, else the first one returned.
pub async fn fetch_primary_location(client: &ShopifyClient) -> Result<Location, ShopifyError> {
    let data: LocationsData = client.request(PRIMARY_LOCATION, json!({})).await?;
    pick_primary(data.locations.nodes)
        .ok_or_else(|| ShopifyError::MissingPrerequisite("No primary location found".into()))
}

fn pick_primary(locations: Vec<Location>) -> Option<Location> {
    let primary = locations.iter().position(|location| location.is_primary);
    locations.into_iter().nth(primary.unwrap_or(0))
}

pub fn format_price(price: f64) -> String {
    format!("{price:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shopify::mock::{MockTransport, Reply};
    use std::sync::Arc;

    fn location(id: &str, primary: bool) -> Location {
        Location {
            id: id.into(),
            name: id.into(),
            is_primary: primary,
        }
    }

    #[test]
    fn primary_location_wins_over_order() {
        let picked = pick_primary(vec![location("a", false), location("b", true)]).expect("loc");
        assert_eq!(picked.id, "b");
        let picked = pick_primary(vec![location("a", false), location("b", false)]).expect("loc");
        assert_eq!(picked.id, "a");
        assert!(pick_primary(vec![]).is_none());
    }

    #[test]
    fn prices_use_two_decimals() {
        assert_eq!(format_price(500.0), "500.00");
        assert_eq!(format_price(12.5), "12.50");
    }

    #[tokio::test]
    async fn no_locations_is_a_missing_prerequisite() {
        let mock = Arc::new(MockTransport::new());
        mock.reply("primaryLocation", Reply::Data(json!({ "locations": { "nodes": [] } })));
        let client = ShopifyClient::new(mock);
        let err = fetch_primary_location(&client).await.expect_err("none");
        assert_eq!(err.to_string(), "No primary location found");
    }

    #[tokio::test]
    async fn price_update_denies_overselling() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "productVariantsBulkUpdate",
            Reply::Data(json!({ "productVariantsBulkUpdate": {
                "productVariants": [{ "id": "v1", "price": "450.00",
                    "inventoryItem": { "id": "i1", "tracked": false } }],
                "userErrors": []
            }})),
        );
        let client = ShopifyClient::new(mock.clone());
        let variant = update_variant_price(&client, "p1", "v1", 450.0).await.expect("update");
        assert_eq!(variant.inventory_item.expect("item").id, "i1");
        let vars = &mock.variables("productVariantsBulkUpdate")[0];
        assert_eq!(vars["variants"][0]["price"], "450.00");
        assert_eq!(vars["variants"][0]["inventoryPolicy"], "DENY");
    }
}
