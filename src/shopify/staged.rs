use crate::media::BinaryFile;
use crate::shopify::{ShopifyClient, ShopifyError, UserError, ensure_no_user_errors};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const STAGED_UPLOADS_CREATE: &str = r#"
mutation stagedUploadsCreate($input: [StagedUploadInput!]!) {
  stagedUploadsCreate(input: $input) {
    stagedTargets { url resourceUrl parameters { name value } }
    userErrors { field message }
  }
}"#;

/// Pre-authorized upload slot: POST the parameters plus the file to `url`,
/// then reference the image by `resource_url`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedTarget {
    pub url: String,
    pub resource_url: String,
    #[serde(default)]
    pub parameters: Vec<StagedParameter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StagedData {
    staged_uploads_create: StagedPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StagedPayload {
    #[serde(default)]
    staged_targets: Vec<StagedTarget>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

pub async fn create_staged_upload(
    client: &ShopifyClient,
    filename: &str,
    mime_type: &str,
) -> Result<StagedTarget, ShopifyError> {
    let data: StagedData = client
        .request(
            STAGED_UPLOADS_CREATE,
            json!({
                "input": [{
                    "filename": filename,
                    "mimeType": mime_type,
                    "httpMethod": "POST",
                    "resource": "FILE",
                }]
            }),
        )
        .await?;
    let payload = data.staged_uploads_create;
    ensure_no_user_errors("stagedUploadsCreate", &payload.user_errors)?;
    payload
        .staged_targets
        .into_iter()
        .next()
        .ok_or_else(|| ShopifyError::MissingPrerequisite("Failed to get staged upload URL".into()))
}

/// Reserves a slot, pushes the bytes and returns the resource URL to attach.
pub async fn upload_image(
    client: &ShopifyClient,
    file: &BinaryFile,
    filename: &str,
) -> Result<String, ShopifyError> {
    let target = create_staged_upload(client, filename, file.mime_type()).await?;
    client.upload(&target, filename, file).await?;
    debug!(
        target = "atelier.shopify",
        filename,
        resource_url = %target.resource_url,
        "image_staged"
    );
    Ok(target.resource_url)
}

/// `{title with non-alphanumerics replaced by '_'}_{n}.{ext}`, `n` counting from 1.
pub fn staged_filename(title: &str, position: usize, extension: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{stem}_{}.{extension}", position + 1)
}
