use crate::catalog::{Category, ProductDraft};
use crate::llm::{ContentPart, LanguageModel, LlmError, LlmMessage, generate_json};
use crate::media::BinaryFile;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

const INSTRUCTIONS: &str = r#"
You are a fashion expert tasked with analyzing clothing images and organizing them into structured shop product listings.

I will provide you with {count} clothing images. Your task is to:

1. Analyze all the images and identify distinct products/clothing items
2. Group similar items together (same design photographed from different angles)
3. Generate appropriate product titles and descriptions
4. Assign one category per product
5. Map which image indexes belong to each product

For each product, provide:
- title: A clear, descriptive product name (e.g. "Floral Summer Dress", "Classic Denim Jacket")
- description: A markdown description covering style, material hints, occasion and key features
- imageIndexes: Array of image indexes that show this product, indexes start from 0
- category: One of these categories: {categories}
- price: Leave at 500 unless the images make a different price obvious
- hasLongSleeves: whether the product has long sleeves

Guidelines:
- If images show the same item from different angles, group them as one product
- Every image index must be used by exactly one product
- Keep titles and descriptions simple; the readers are not native English speakers
- Order each product's images as: full length front picture, slightly zoomed front picture, back picture

Example title: `Impressionist Floral Wrap Dress - Short Sleeve V-Neck Midi Dress with Tie Belt`
Example description:
```
A folk-inspired midi dress featuring warm autumn stripes in orange, brown, and beige.

**Key Features:**
- Multi-colored vertical stripes in autumn tones
- Ruffled collar detail
- A-line midi skirt

**Occasion:**
- Fall festivals
- Autumn weddings
```

Output raw parsable JSON of the form {"products": [...]} with no additional text.
"#;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no images provided")]
    NoImages,
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("invalid image index {index} (product `{title}`, {image_count} images uploaded)")]
    InvalidImageIndex {
        index: i64,
        title: String,
        image_count: usize,
    },
    #[error("invalid price {price} for product `{title}`")]
    InvalidPrice { price: f64, title: String },
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DraftEnvelope {
    products: Vec<ProductDraft>,
}

/// Result of a validated inference call.
#[derive(Debug, Clone)]
pub struct DraftSet {
    pub drafts: Vec<ProductDraft>,
    /// Uploaded images no draft refers to. Reported, never rejected.
    pub unused_indexes: Vec<usize>,
}

#[derive(Clone)]
pub struct ListingInference {
    llm: Arc<dyn LanguageModel>,
}

impl ListingInference {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub async fn infer(&self, images: &[BinaryFile]) -> Result<DraftSet, InferenceError> {
        if images.is_empty() {
            return Err(InferenceError::NoImages);
        }
        let started = Instant::now();
        let messages = build_prompt(images);
        let envelope: DraftEnvelope = generate_json(self.llm.as_ref(), messages).await?;
        crate::metrics::stage_elapsed("inference", started.elapsed().as_millis());
        let set = validate_drafts(envelope.products, images.len())?;
        info!(
            target = "atelier.inference",
            images = images.len(),
            products = set.drafts.len(),
            unused = set.unused_indexes.len(),
            "drafts_inferred"
        );
        Ok(set)
    }
}

/// The instructions as a system message, then one user message of
/// `Image {i}:` / image pairs.
pub fn build_prompt(images: &[BinaryFile]) -> Vec<LlmMessage> {
    let categories = Category::ALL
        .iter()
        .map(|c| format!("'{c}'"))
        .collect::<Vec<_>>()
        .join(" | ");
    let instructions = INSTRUCTIONS
        .replace("{count}", &images.len().to_string())
        .replace("{categories}", &categories);

    let mut content = Vec::with_capacity(images.len() * 2);
    for (index, image) in images.iter().enumerate() {
        content.push(ContentPart::Text(format!("Image {index}:")));
        content.push(ContentPart::Image(image.to_data_url()));
    }
    vec![LlmMessage::system(instructions), LlmMessage::user(content)]
}

/// Rejects the whole set if any index falls outside `[0, image_count)`.
pub fn validate_drafts(
    drafts: Vec<ProductDraft>,
    image_count: usize,
) -> Result<DraftSet, InferenceError> {
    let mut used = BTreeSet::new();
    for draft in &drafts {
        if !draft.price.is_finite() || draft.price < 0.0 {
            return Err(InferenceError::InvalidPrice {
                price: draft.price,
                title: draft.title.clone(),
            });
        }
        for &index in &draft.image_indexes {
            if index < 0 || index as usize >= image_count {
                return Err(InferenceError::InvalidImageIndex {
                    index,
                    title: draft.title.clone(),
                    image_count,
                });
            }
            used.insert(index as usize);
        }
    }

    let unused_indexes: Vec<usize> = (0..image_count).filter(|i| !used.contains(i)).collect();
    if !unused_indexes.is_empty() {
        warn!(
            target = "atelier.inference",
            used = used.len(),
            total = image_count,
            unused = ?unused_indexes,
            "images_not_used_in_products"
        );
    }
    Ok(DraftSet {
        drafts,
        unused_indexes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::llm::mock::ScriptedModel;

    fn images(n: usize) -> Vec<BinaryFile> {
        (0..n)
            .map(|i| BinaryFile::new(format!("{i}.jpg"), "image/jpeg", vec![i as u8; 4]))
            .collect()
    }

    fn draft(indexes: &[i64]) -> ProductDraft {
        ProductDraft {
            title: "Linen Midi".into(),
            description: "Light".into(),
            image_indexes: indexes.to_vec(),
            category: Category::Midi,
            price: 500.0,
            has_long_sleeves: false,
        }
    }

    #[test]
    fn out_of_range_index_rejects_whole_set() {
        let err = validate_drafts(vec![draft(&[0, 1]), draft(&[3])], 3).expect_err("reject");
        assert!(matches!(err, InferenceError::InvalidImageIndex { index: 3, .. }));
        let err = validate_drafts(vec![draft(&[-1])], 3).expect_err("reject");
        assert!(matches!(err, InferenceError::InvalidImageIndex { index: -1, .. }));
    }

    #[test]
    fn unused_images_only_warn() {
        let set = validate_drafts(vec![draft(&[0, 2])], 4).expect("accept");
        assert_eq!(set.unused_indexes, vec![1, 3]);
        assert_eq!(set.drafts.len(), 1);
    }

    #[test]
    fn prompt_interleaves_labels_and_images() {
        let messages = build_prompt(&images(2));
        assert_eq!(messages.len(), 2);
        let system = &messages[0];
        assert_eq!(system.role, Role::System);
        assert!(matches!(
            &system.content[0],
            ContentPart::Text(t) if t.contains("2 clothing images") && t.contains("'midi' | 'mini' | 'top'")
        ));

        let user = &messages[1];
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content.len(), 4);
        assert!(matches!(&user.content[0], ContentPart::Text(t) if t == "Image 0:"));
        assert!(matches!(
            &user.content[1],
            ContentPart::Image(u) if u.starts_with("data:image/jpeg;base64,")
        ));
        assert!(matches!(&user.content[2], ContentPart::Text(t) if t == "Image 1:"));
    }

    #[tokio::test]
    async fn infer_returns_validated_drafts() {
        let model = Arc::new(ScriptedModel::new([r#"```json
{"products":[{"title":"Striped Midi","description":"Autumn stripes","imageIndexes":[0,1,2],"category":"midi"}]}
```"#]));
        let inference = ListingInference::new(model.clone());
        let set = inference.infer(&images(3)).await.expect("infer");
        assert_eq!(set.drafts.len(), 1);
        assert_eq!(set.drafts[0].image_indexes, vec![0, 1, 2]);
        assert_eq!(set.drafts[0].price, 500.0);
        assert!(set.unused_indexes.is_empty());
        assert_eq!(model.requests()[0][1].image_count(), 3);
    }

    #[tokio::test]
    async fn infer_surfaces_schema_mismatch() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"products":[{"title":"x","description":"y","imageIndexes":[0],"category":"maxi"}]}"#,
        ]));
        let err = ListingInference::new(model)
            .infer(&images(1))
            .await
            .expect_err("schema");
        assert!(matches!(err, InferenceError::Llm(LlmError::Schema(_))));
    }

    #[tokio::test]
    async fn model_transport_failure_surfaces_as_llm_error() {
        let model = Arc::new(ScriptedModel::failing("HTTP 503 Service Unavailable"));
        let err = ListingInference::new(model)
            .infer(&images(2))
            .await
            .expect_err("transport");
        assert!(matches!(err, InferenceError::Llm(LlmError::Http(ref m)) if m.contains("503")));
    }

    #[tokio::test]
    async fn infer_rejects_empty_upload() {
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let err = ListingInference::new(model).infer(&[]).await.expect_err("empty");
        assert!(matches!(err, InferenceError::NoImages));
    }
}
