use crate::catalog::{CreatedProduct, Product};
use crate::media::BinaryFile;
use crate::publisher::PublishState;
use crate::sequencer::BranchReport;
use crate::session::{EditableListing, SessionView};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesRequest {
    pub images: Vec<BinaryFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductRequest {
    pub product: Product,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateProductResponse {
    #[serde(flatten)]
    pub product: CreatedProduct,
    pub branches: Vec<BranchReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: SessionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishState>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingUpdate {
    pub listing: EditableListing,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishAccepted {
    pub session_id: Uuid,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
