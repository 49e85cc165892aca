use once_cell::sync::Lazy;
use std::env;

pub static API_VERSION: Lazy<String> =
    Lazy::new(|| env::var("SHOPIFY_API_VERSION").unwrap_or_else(|_| "2024-10".to_string()));

/// Standard product taxonomy node assigned to every created product (dresses).
pub static TAXONOMY_CATEGORY: Lazy<String> = Lazy::new(|| {
    env::var("SHOPIFY_TAXONOMY_CATEGORY")
        .unwrap_or_else(|_| "gid://shopify/TaxonomyCategory/aa-1-4".to_string())
});

#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub store_domain: String,
    pub access_token: String,
    pub api_version: String,
}

impl ShopifyConfig {
    pub fn from_env() -> Option<Self> {
        let store_domain = env::var("SHOPIFY_STORE_DOMAIN")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let access_token = env::var("SHOPIFY_ACCESS_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        Some(Self {
            store_domain,
            access_token,
            api_version: API_VERSION.clone(),
        })
    }

    pub fn graphql_url(&self) -> String {
        let domain = self
            .store_domain
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("https://{domain}/admin/api/{}/graphql.json", self.api_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_url_normalizes_domain() {
        let config = ShopifyConfig {
            store_domain: "https://atelier-demo.myshopify.com/".into(),
            access_token: "shpat_x".into(),
            api_version: "2024-10".into(),
        };
        assert_eq!(
            config.graphql_url(),
            "https://atelier-demo.myshopify.com/admin/api/2024-10/graphql.json"
        );
    }
}
