mod catalog;
mod http;
mod inference;
mod llm;
mod media;
mod metrics;
mod models;
mod publisher;
mod security;
mod sequencer;
mod session;
mod shopify;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use catalog::ProductDraft;
use eyre::WrapErr;
use inference::{InferenceError, ListingInference};
use llm::{LlmClient, LlmConfig, LlmError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, CreateProductRequest, CreateProductResponse, ImagesRequest, ListingUpdate,
    PublishAccepted, SessionResponse,
};
use publisher::{PublishError, Publisher};
use security::{AuthState, OperatorContext, require_api_auth};
use sequencer::{MaterializeError, Sequencer};
use serde_json::json;
use session::{SessionError, SessionStore};
use shopify::ShopifyError;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "atelier.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let llm_config = LlmConfig::from_env();
    info!(target = "atelier.api", model = %llm_config.model, "language model configured");
    let inference = ListingInference::new(Arc::new(LlmClient::new(llm_config)));
    let sequencer = Sequencer::from_env();
    let sessions = SessionStore::from_env();
    let (publisher, _worker) = Publisher::spawn(sequencer.clone(), sessions.clone());
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let state = AppState {
        inference,
        sequencer,
        sessions,
        publisher,
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };
    let app = build_router(state, AuthState::from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "atelier.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    inference: ListingInference,
    sequencer: Sequencer,
    sessions: SessionStore,
    publisher: Publisher,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn build_router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/products/drafts", post(create_drafts))
        .route("/products", post(create_product))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route(
            "/sessions/{id}/listings/{index}",
            put(update_listing).delete(remove_listing),
        )
        .route("/sessions/{id}/publish", post(publish_session))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({ "openapi": "3.0.3" }))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Images travel base64-encoded inside JSON bodies.
fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64 * 1024 * 1024)
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "atelier-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServiceError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(ServiceError::invalid_input("docs", "unauthorized"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Response {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Atelier API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Group uploaded photos into product drafts.
///
/// - Method: `POST`
/// - Path: `/products/drafts`
/// - Body: `{ "images": BinaryFile[] }`
/// - Response: `ProductDraft[]`
async fn create_drafts(
    State(state): State<AppState>,
    Extension(operator): Extension<OperatorContext>,
    Json(payload): Json<ImagesRequest>,
) -> Result<Json<Vec<ProductDraft>>, ServiceError> {
    crate::metrics::inc_requests("/products/drafts");
    info!(
        target = "atelier.api",
        operator = %operator.operator,
        images = payload.images.len(),
        "draft inference requested"
    );
    let set = state.inference.infer(&payload.images).await?;
    Ok(Json(set.drafts))
}

/// Materialize one approved product on the store.
///
/// - Method: `POST`
/// - Path: `/products`
/// - Body: `{ "product": Product }`
/// - Response: `{ id, title, handle, branches }`. A partial failure answers
///   502 and names the product id left on the store.
async fn create_product(
    State(state): State<AppState>,
    Extension(operator): Extension<OperatorContext>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<Json<CreateProductResponse>, ServiceError> {
    crate::metrics::inc_requests("/products");
    info!(
        target = "atelier.api",
        operator = %operator.operator,
        title = %payload.product.title,
        "product creation requested"
    );
    let done = state.sequencer.materialize(payload.product).await?;
    Ok(Json(CreateProductResponse {
        product: done.product,
        branches: done.branches,
    }))
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<ImagesRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ServiceError> {
    crate::metrics::inc_requests("/sessions");
    for expired in state.sessions.evict_expired().await {
        state.publisher.forget(expired).await;
    }
    let session = state.sessions.create(&state.inference, payload.images).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session,
            publish: None,
        }),
    ))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ServiceError> {
    let session = state.sessions.get(id).await?;
    let publish = state.publisher.status(id).await;
    Ok(Json(SessionResponse { session, publish }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    crate::metrics::inc_requests("/sessions/delete");
    state.sessions.remove(id).await?;
    state.publisher.forget(id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_listing(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(payload): Json<ListingUpdate>,
) -> Result<Json<SessionResponse>, ServiceError> {
    crate::metrics::inc_requests("/sessions/listings");
    let session = state.sessions.update_listing(id, index, payload.listing).await?;
    let publish = state.publisher.status(id).await;
    Ok(Json(SessionResponse { session, publish }))
}

async fn remove_listing(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<SessionResponse>, ServiceError> {
    crate::metrics::inc_requests("/sessions/listings");
    let session = state.sessions.remove_listing(id, index).await?;
    let publish = state.publisher.status(id).await;
    Ok(Json(SessionResponse { session, publish }))
}

/// Queue every remaining listing of a session for serial materialization.
/// Progress is read back through `GET /sessions/{id}`.
async fn publish_session(
    State(state): State<AppState>,
    Extension(operator): Extension<OperatorContext>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<PublishAccepted>), ServiceError> {
    crate::metrics::inc_requests("/sessions/publish");
    let products = state.sessions.begin_publish(id).await?;
    let total = products.len();
    if let Err(err) = state.publisher.enqueue(id, products).await {
        state.sessions.abort_publish(id).await;
        return Err(err.into());
    }
    info!(
        target = "atelier.api",
        operator = %operator.operator,
        session_id = %id,
        total,
        "publish queued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishAccepted {
            session_id: id,
            total,
        }),
    ))
}

#[derive(Debug)]
struct ServiceError {
    stage: &'static str,
    message: String,
    kind: ServiceErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Upstream,
    Internal,
}

impl ServiceError {
    fn new(stage: &'static str, kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, ServiceErrorKind::InvalidInput, message)
    }
}

impl From<InferenceError> for ServiceError {
    fn from(err: InferenceError) -> Self {
        let kind = match &err {
            InferenceError::NoImages
            | InferenceError::InvalidImageIndex { .. }
            | InferenceError::InvalidPrice { .. } => ServiceErrorKind::InvalidInput,
            InferenceError::Llm(LlmError::UnsupportedModel(_) | LlmError::MissingApiKey(_)) => {
                ServiceErrorKind::Internal
            }
            InferenceError::Llm(_) => ServiceErrorKind::Upstream,
        };
        Self::new("inference", kind, err.to_string())
    }
}

impl From<MaterializeError> for ServiceError {
    fn from(err: MaterializeError) -> Self {
        let kind = match &err {
            MaterializeError::Invalid(_) => ServiceErrorKind::InvalidInput,
            MaterializeError::Create(ShopifyError::UserErrors { .. }) => {
                ServiceErrorKind::InvalidInput
            }
            MaterializeError::Create(ShopifyError::NotConfigured(_)) => ServiceErrorKind::Internal,
            MaterializeError::Create(_) | MaterializeError::Partial { .. } => {
                ServiceErrorKind::Upstream
            }
        };
        Self::new("materialize", kind, err.to_string())
    }
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        let kind = match err {
            SessionError::Inference(inner) => return inner.into(),
            SessionError::NotFound(_) | SessionError::ListingOutOfRange { .. } => {
                ServiceErrorKind::NotFound
            }
            SessionError::InvalidListing { .. } | SessionError::NothingToPublish => {
                ServiceErrorKind::InvalidInput
            }
            SessionError::Publishing(_) | SessionError::AlreadyPublished(_) => {
                ServiceErrorKind::Conflict
            }
        };
        Self::new("session", kind, err.to_string())
    }
}

impl From<PublishError> for ServiceError {
    fn from(err: PublishError) -> Self {
        let kind = match err {
            PublishError::AlreadyPublishing(_) | PublishError::AlreadyPublished(_) => {
                ServiceErrorKind::Conflict
            }
            PublishError::WorkerUnavailable => ServiceErrorKind::Internal,
        };
        Self::new("publish", kind, err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ServiceErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ServiceErrorKind::NotFound => StatusCode::NOT_FOUND,
            ServiceErrorKind::Conflict => StatusCode::CONFLICT,
            ServiceErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ServiceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(
                target = "atelier.api",
                stage = self.stage,
                detail = %self.message,
                "request_failed"
            );
        }
        let payload = ApiError {
            error: self.stage.to_string(),
            detail: Some(self.message),
        };
        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedModel;
    use crate::media::BinaryFile;
    use crate::sequencer::{SequencerConfig, SettleStrategy};
    use crate::shopify::ShopifyClient;
    use crate::shopify::mock::{MockTransport, Reply};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tokio::time::Duration;
    use tower::ServiceExt;

    const DRAFTS: &str = r#"{"products":[
        {"title":"Striped Midi","description":"Autumn stripes","imageIndexes":[0,1],"category":"midi"},
        {"title":"Linen Top","description":"Linen","imageIndexes":[2],"category":"top","hasLongSleeves":true}
    ]}"#;

    fn app(replies: &[&str], mock: Arc<MockTransport>, auth: AuthState) -> Router {
        let inference = ListingInference::new(Arc::new(ScriptedModel::new(replies.to_vec())));
        let sequencer = Sequencer::new(
            ShopifyClient::new(mock),
            SequencerConfig {
                taxonomy_category: "gid://shopify/TaxonomyCategory/aa-1-4".into(),
                settle: SettleStrategy::Fixed(Duration::from_millis(1)),
            },
        );
        let sessions = SessionStore::new();
        let (publisher, _worker) = Publisher::spawn(sequencer.clone(), sessions.clone());
        let state = AppState {
            inference,
            sequencer,
            sessions,
            publisher,
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        };
        build_router(state, auth)
    }

    fn images_body(n: usize) -> Body {
        let images: Vec<BinaryFile> = (0..n)
            .map(|i| BinaryFile::new(format!("{i}.jpg"), "image/jpeg", vec![i as u8; 16]))
            .collect();
        Body::from(serde_json::to_vec(&json!({ "images": images })).expect("body"))
    }

    fn post(uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .expect("request")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("bytes");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app(&[], Arc::new(MockTransport::new()), AuthState::from_keys("studio:k"));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn drafts_require_api_key_when_configured() {
        let app = app(&[DRAFTS], Arc::new(MockTransport::new()), AuthState::from_keys("studio:k"));
        let response = app
            .clone()
            .oneshot(post("/products/drafts", images_body(3)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = post("/products/drafts", images_body(3));
        request
            .headers_mut()
            .insert("X-Api-Key", "k".parse().expect("header"));
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let drafts = json_body(response).await;
        assert_eq!(drafts.as_array().expect("array").len(), 2);
        assert_eq!(drafts[0]["price"], 500.0);
        assert_eq!(drafts[1]["hasLongSleeves"], true);
    }

    #[tokio::test]
    async fn out_of_range_index_is_a_bad_request() {
        let app = app(&[DRAFTS], Arc::new(MockTransport::new()), AuthState::default());
        let response = app
            .oneshot(post("/products/drafts", images_body(2)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "inference");
        assert!(body["detail"].as_str().expect("detail").contains("invalid image index 2"));
    }

    #[tokio::test]
    async fn model_failure_is_a_bad_gateway() {
        let inference = ListingInference::new(Arc::new(ScriptedModel::failing("HTTP 503")));
        let sequencer = Sequencer::new(
            ShopifyClient::new(Arc::new(MockTransport::new())),
            SequencerConfig::default(),
        );
        let sessions = SessionStore::new();
        let (publisher, _worker) = Publisher::spawn(sequencer.clone(), sessions.clone());
        let app = build_router(
            AppState {
                inference,
                sequencer,
                sessions,
                publisher,
                openapi: Arc::new(load_openapi()),
                prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            },
            AuthState::default(),
        );
        let response = app
            .oneshot(post("/products/drafts", images_body(2)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(response).await["error"], "inference");
    }

    #[tokio::test]
    async fn session_edit_flow() {
        let app = app(&[DRAFTS], Arc::new(MockTransport::new()), AuthState::default());
        let response = app
            .clone()
            .oneshot(post("/sessions", images_body(4)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let session = json_body(response).await;
        let id = session["id"].as_str().expect("id").to_string();
        assert_eq!(session["unused_indexes"], json!([3]));
        assert_eq!(
            session["listings"][1]["sizeChart"],
            "Shoulder - \nBust - \nLength - \nSleeves - "
        );

        let mut listing = session["listings"][0].clone();
        listing["title"] = json!("Striped Midi Dress");
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/sessions/{id}/listings/0"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&json!({ "listing": listing })).expect("body"),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["listings"][0]["title"], "Striped Midi Dress");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/sessions/{id}/listings/7"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/sessions/{id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::get(format!("/sessions/{id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_user_errors_are_a_bad_request() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            "productCreate",
            Reply::Data(json!({ "productCreate": {
                "product": null,
                "userErrors": [{ "field": ["title"], "message": "has already been taken" }]
            }})),
        );
        let app = app(&[], mock, AuthState::default());
        let body = json!({ "product": {
            "title": "Striped Midi",
            "description": "Stripes",
            "images": [],
            "category": "midi"
        }});
        let response = app
            .oneshot(post("/products", Body::from(serde_json::to_vec(&body).expect("body"))))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["detail"].as_str().expect("detail").contains("title: has already been taken"));
    }

    #[tokio::test]
    async fn unconfigured_store_is_an_internal_error() {
        let inference = ListingInference::new(Arc::new(ScriptedModel::new(Vec::<String>::new())));
        let sequencer = Sequencer::new(
            ShopifyClient::new(Arc::new(shopify::client::UnconfiguredTransport)),
            SequencerConfig::default(),
        );
        let sessions = SessionStore::new();
        let (publisher, _worker) = Publisher::spawn(sequencer.clone(), sessions.clone());
        let app = build_router(
            AppState {
                inference,
                sequencer,
                sessions,
                publisher,
                openapi: Arc::new(load_openapi()),
                prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            },
            AuthState::default(),
        );
        let body = json!({ "product": {
            "title": "Top", "description": "", "images": [], "category": "top", "price": 90
        }});
        let response = app
            .oneshot(post("/products", Body::from(serde_json::to_vec(&body).expect("body"))))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = app(&[], Arc::new(MockTransport::new()), AuthState::default());
        let response = app
            .oneshot(Request::get("/openapi.json").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let doc = json_body(response).await;
        assert!(doc["paths"]["/sessions/{id}/publish"].is_object());
    }
}
