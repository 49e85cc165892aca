use crate::media::BinaryFile;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PRICE: f64 = 500.0;

/// Closed set of storefront categories. Shared by model output, the human edit
/// step and collection matching during materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Midi,
    Mini,
    Top,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Midi, Category::Mini, Category::Top];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Midi => "midi",
            Category::Mini => "mini",
            Category::Top => "top",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_price() -> f64 {
    DEFAULT_PRICE
}

/// One product grouping proposed by the model, before human edits.
///
/// `image_indexes` point into the uploaded image list, in display order
/// (full front, zoomed front, back).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductDraft {
    pub title: String,
    pub description: String,
    pub image_indexes: Vec<i64>,
    pub category: Category,
    #[serde(default = "default_price")]
    #[schemars(range(min = 0))]
    pub price: f64,
    #[serde(default)]
    pub has_long_sleeves: bool,
}

/// An approved listing, ready to be pushed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub title: String,
    /// Markdown; rendered to sanitized HTML on submission.
    pub description: String,
    pub images: Vec<BinaryFile>,
    pub category: Category,
    #[serde(default = "default_price")]
    pub price: f64,
}

impl Product {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(format!("price must be >= 0, got {}", self.price));
        }
        Ok(())
    }
}

/// Identity of a product shell as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedProduct {
    pub id: String,
    pub title: String,
    pub handle: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_defaults_price_and_sleeves() {
        let draft: ProductDraft = serde_json::from_value(json!({
            "title": "Floral Wrap Dress",
            "description": "Soft and flowy",
            "imageIndexes": [0, 2],
            "category": "midi",
        }))
        .expect("draft");
        assert_eq!(draft.price, DEFAULT_PRICE);
        assert!(!draft.has_long_sleeves);
        assert_eq!(draft.category, Category::Midi);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let err = serde_json::from_value::<ProductDraft>(json!({
            "title": "t",
            "description": "d",
            "imageIndexes": [0],
            "category": "dresses",
        }));
        assert!(err.is_err());
    }

    #[test]
    fn product_validation_rejects_negative_price() {
        let product = Product {
            title: "Top".into(),
            description: String::new(),
            images: vec![],
            category: Category::Top,
            price: -1.0,
        };
        assert!(product.validate().is_err());
        let ok = Product {
            price: 0.0,
            ..product
        };
        assert!(ok.validate().is_ok());
    }
}
