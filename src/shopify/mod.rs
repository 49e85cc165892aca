pub mod cache;
pub mod client;
pub mod collections;
pub mod config;
pub mod description;
pub mod inventory;
#[cfg(test)]
pub mod mock;
pub mod products;
pub mod publications;
pub mod staged;

pub use cache::LookupCache;
pub use client::ShopifyClient;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ShopifyError {
    #[error("shopify is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(String),
    #[error("graphql error: {0}")]
    GraphQl(String),
    #[error("{operation} failed: {message}")]
    UserErrors {
        operation: &'static str,
        message: String,
    },
    #[error("{0}")]
    MissingPrerequisite(String),
    #[error("staged upload failed: {0}")]
    Upload(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("{failed} of {total} images failed: {details}")]
    Media {
        failed: usize,
        total: usize,
        details: String,
    },
}

/// Platform-level validation error attached to a mutation payload.
#[derive(Debug, Clone, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

impl UserError {
    fn describe(&self) -> String {
        match self.field.as_deref() {
            Some(path) if !path.is_empty() => format!("{}: {}", path.join("."), self.message),
            _ => self.message.clone(),
        }
    }
}

/// Fails with every reported `field: message` pair joined together.
pub fn ensure_no_user_errors(
    operation: &'static str,
    errors: &[UserError],
) -> Result<(), ShopifyError> {
    if errors.is_empty() {
        return Ok(());
    }
    tracing::error!(target = "atelier.shopify", operation, errors = ?errors, "shopify_user_errors");
    Err(ShopifyError::UserErrors {
        operation,
        message: errors
            .iter()
            .map(UserError::describe)
            .collect::<Vec<_>>()
            .join(", "),
    })
}
