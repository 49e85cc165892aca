use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct AuthState {
    keys: Arc<HashMap<String, OperatorContext>>,
}

/// Who is driving the request. Attached to every request that passes the gate.
#[derive(Clone, Debug)]
pub struct OperatorContext {
    pub operator: String,
    pub api_key_id: String,
}

impl OperatorContext {
    fn anonymous() -> Self {
        Self {
            operator: "anonymous".to_string(),
            api_key_id: "none".to_string(),
        }
    }
}

impl AuthState {
    pub fn from_env() -> Self {
        Self::from_keys(&env::var("API_KEYS").unwrap_or_default())
    }

    /// `operator:key` pairs separated by commas; a bare `key` gets a
    /// generated operator name. No keys means the gate is open.
    pub fn from_keys(raw: &str) -> Self {
        let mut keys = HashMap::new();
        for (idx, token) in raw.split(',').map(str::trim).filter(|t| !t.is_empty()).enumerate() {
            let (operator, secret) = match token.split_once(':') {
                Some((operator, secret)) => (operator.trim().to_string(), secret.trim()),
                None => (format!("operator-{:02}", idx + 1), token),
            };
            if secret.is_empty() || operator.is_empty() {
                warn!(target = "atelier.api", "ignored malformed API_KEYS entry #{}", idx + 1);
                continue;
            }
            keys.insert(
                secret.to_string(),
                OperatorContext {
                    operator,
                    api_key_id: format!("key-{:02}", idx + 1),
                },
            );
        }

        if keys.is_empty() {
            warn!(target = "atelier.api", "API_KEYS is empty; API authentication disabled");
        } else {
            info!(target = "atelier.api", key_count = keys.len(), "loaded API keys from env");
        }
        Self {
            keys: Arc::new(keys),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    fn authenticate(&self, presented: &str) -> Option<OperatorContext> {
        self.keys.get(presented).cloned()
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    if !state.enabled() {
        request.extensions_mut().insert(OperatorContext::anonymous());
        return Ok(next.run(request).await);
    }

    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Api-Key or Bearer token",
        ));
    };
    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Api-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_named_and_bare_keys() {
        let state = AuthState::from_keys("studio:s3cret, bare-key ,:orphan");
        assert!(state.enabled());
        assert_eq!(state.authenticate("s3cret").expect("named").operator, "studio");
        assert_eq!(state.authenticate("bare-key").expect("bare").operator, "operator-02");
        assert!(state.authenticate("orphan").is_none());
        assert!(!AuthState::from_keys("  ").enabled());
    }

    #[test]
    fn bearer_takes_precedence_over_header() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("X-Api-Key", HeaderValue::from_static("def"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));
        headers.remove(http::header::AUTHORIZATION);
        assert_eq!(extract_api_key(&headers).as_deref(), Some("def"));
    }
}
