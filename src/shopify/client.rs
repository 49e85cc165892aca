use crate::http::build_client;
use crate::media::BinaryFile;
use crate::shopify::ShopifyError;
use crate::shopify::config::ShopifyConfig;
use crate::shopify::staged::StagedTarget;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::Form;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorEntry {
    pub message: String,
}

/// Wire access to the Admin API: one GraphQL round trip, or a multipart POST
/// to a staged upload target.
#[async_trait]
pub trait AdminTransport: Send + Sync {
    async fn execute(&self, query: &str, variables: Value) -> Result<GraphQlResponse, ShopifyError>;

    async fn upload(
        &self,
        target: &StagedTarget,
        filename: &str,
        file: &BinaryFile,
    ) -> Result<(), ShopifyError>;
}

pub struct HttpTransport {
    http: Client,
    config: ShopifyConfig,
}

impl HttpTransport {
    pub fn new(config: ShopifyConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Option<Self> {
        ShopifyConfig::from_env().map(Self::new)
    }
}

#[async_trait]
impl AdminTransport for HttpTransport {
    async fn execute(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<GraphQlResponse, ShopifyError> {
        let response = self
            .http
            .post(self.config.graphql_url())
            .header("X-Shopify-Access-Token", &self.config.access_token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|err| ShopifyError::Request(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ShopifyError::Request(err.to_string()))?;
        if !status.is_success() {
            return Err(ShopifyError::Request(format!("HTTP {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|err| ShopifyError::Decode(err.to_string()))
    }

    async fn upload(
        &self,
        target: &StagedTarget,
        filename: &str,
        file: &BinaryFile,
    ) -> Result<(), ShopifyError> {
        let mut form = Form::new();
        for param in &target.parameters {
            form = form.text(param.name.clone(), param.value.clone());
        }
        let part = file
            .to_part(filename)
            .map_err(|err| ShopifyError::Upload(err.to_string()))?;
        form = form.part("file", part);

        let response = self
            .http
            .post(&target.url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ShopifyError::Upload(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShopifyError::Upload(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}

/// Stands in when no store credentials are configured so the drafting
/// routes keep working.
pub struct UnconfiguredTransport;

#[async_trait]
impl AdminTransport for UnconfiguredTransport {
    async fn execute(
        &self,
        _query: &str,
        _variables: Value,
    ) -> Result<GraphQlResponse, ShopifyError> {
        Err(ShopifyError::NotConfigured(
            "SHOPIFY_STORE_DOMAIN and SHOPIFY_ACCESS_TOKEN are required",
        ))
    }

    async fn upload(
        &self,
        _target: &StagedTarget,
        _filename: &str,
        _file: &BinaryFile,
    ) -> Result<(), ShopifyError> {
        Err(ShopifyError::NotConfigured(
            "SHOPIFY_STORE_DOMAIN and SHOPIFY_ACCESS_TOKEN are required",
        ))
    }
}

#[derive(Clone)]
pub struct ShopifyClient {
    transport: Arc<dyn AdminTransport>,
}

impl ShopifyClient {
    pub fn new(transport: Arc<dyn AdminTransport>) -> Self {
        Self { transport }
    }

    pub fn from_env() -> Self {
        match HttpTransport::from_env() {
            Some(transport) => Self::new(Arc::new(transport)),
            None => Self::new(Arc::new(UnconfiguredTransport)),
        }
    }

    /// Runs one operation and decodes its `data` payload. Any top-level
    /// GraphQL error fails the whole call.
    pub async fn request<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, ShopifyError> {
        let operation = operation_name(query).unwrap_or("anonymous");
        debug!(target = "atelier.shopify", operation, "graphql_request");

        let response = match self.transport.execute(query, variables.clone()).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    target = "atelier.shopify",
                    operation,
                    error = %err,
                    variables = %variables,
                    "graphql_transport_failed"
                );
                return Err(err);
            }
        };

        if let Some(errors) = response.errors.as_ref().filter(|errors| !errors.is_empty()) {
            let message = errors
                .iter()
                .map(|entry| entry.message.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            error!(
                target = "atelier.shopify",
                operation,
                errors = %message,
                variables = %variables,
                "graphql_errors"
            );
            return Err(ShopifyError::GraphQl(message));
        }

        let data = response
            .data
            .ok_or_else(|| ShopifyError::Decode(format!("{operation}: response has no data")))?;
        serde_json::from_value(data)
            .map_err(|err| ShopifyError::Decode(format!("{operation}: {err}")))
    }

    pub async fn upload(
        &self,
        target: &StagedTarget,
        filename: &str,
        file: &BinaryFile,
    ) -> Result<(), ShopifyError> {
        self.transport.upload(target, filename, file).await
    }
}

/// Name of the operation declared in a GraphQL document, e.g. `productCreate`.
pub fn operation_name(query: &str) -> Option<&str> {
    let trimmed = query.trim_start();
    let rest = trimmed
        .strip_prefix("mutation")
        .or_else(|| trimmed.strip_prefix("query"))?;
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}
