use crate::shopify::{ShopifyClient, ShopifyError, UserError, ensure_no_user_errors};
use serde::Deserialize;
use serde_json::json;

pub const ONLINE_STORE: &str = "Online Store";

const PUBLICATIONS: &str = r#"
query publications {
  publications(first: 10) { nodes { id name } }
}"#;

const PUBLISHABLE_PUBLISH: &str = r#"
mutation publishablePublish($id: ID!, $input: [PublicationInput!]!) {
  publishablePublish(id: $id, input: $input) {
    publishable { availablePublicationsCount { count } }
    userErrors { field message }
  }
}"#;

#[derive(Debug, Clone, Deserialize)]
pub struct Publication {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct PublicationsData {
    publications: PublicationNodes,
}

#[derive(Debug, Deserialize)]
struct PublicationNodes {
    nodes: Vec<Publication>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishData {
    publishable_publish: PublishPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishPayload {
    #[serde(default)]
    user_errors: Vec<UserError>,
}

pub async fn fetch_online_store(client: &ShopifyClient) -> Result<Publication, ShopifyError> {
    let data: PublicationsData = client.request(PUBLICATIONS, json!({})).await?;
    data.publications
        .nodes
        .into_iter()
        .find(|publication| publication.name == ONLINE_STORE)
        .ok_or_else(|| {
            ShopifyError::MissingPrerequisite("Online Store publication not found".into())
        })
}

pub async fn publish(
    client: &ShopifyClient,
    product_id: &str,
    publication_id: &str,
) -> Result<(), ShopifyError> {
    let data: PublishData = client
        .request(
            PUBLISHABLE_PUBLISH,
            json!({ "id": product_id, "input": [{ "publicationId": publication_id }] }),
        )
        .await?;
    ensure_no_user_errors("publishablePublish", &data.publishable_publish.user_errors)
}
