//! JSON RPC surface for block resolution
//!
//! Routes live under the `node` namespace and are registered once, in
//! [`build_api_router`], on a router that is handed to the HTTP server.
//! Every handler runs its resolution on the blocking pool because store
//! lookups may hit disk.

use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::config::ApiConfig;
use crate::error::{ErrorKind, ResolveError};
use crate::node::NodeState;
use crate::resolver::{BlockResolver, BlockSummary, IdentifierSpec};

/// Route paths, relative to the server root.
pub mod routes {
    pub const GET_BLOCK_INFO: &str = "/node/getBlockInfo";
    pub const GET_BLOCKS_INFO: &str = "/node/getBlocksInfo";
    pub const GET_HEIGHT: &str = "/node/getHeight";
    pub const HEALTH: &str = "/health";
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct Node {
    pub resolver: BlockResolver,
    // Optional orchestrator state (NodeState) for health checks and logging
    pub state: Option<Arc<RwLock<NodeState>>>,
    request_timeout: Duration,
    max_range_blocks: u64,
}

impl Node {
    pub fn new(resolver: BlockResolver, config: &ApiConfig) -> Self {
        Self {
            resolver,
            state: None,
            request_timeout: config.request_timeout(),
            max_range_blocks: config.max_range_blocks,
        }
    }

    /// Create an API node that reports the orchestrator's `NodeState` from
    /// the health endpoint.
    pub fn new_shared(
        resolver: BlockResolver,
        config: &ApiConfig,
        state: Arc<RwLock<NodeState>>,
    ) -> Self {
        Self {
            state: Some(state),
            ..Self::new(resolver, config)
        }
    }

    /// Runs `f` against the resolver on tokio's blocking pool.
    async fn resolve<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&BlockResolver) -> Result<T, ResolveError> + Send + 'static,
    {
        let resolver = self.resolver.clone();
        let result = tokio::task::spawn_blocking(move || f(&resolver))
            .await
            .map_err(|e| ApiError::InternalError(format!("Resolver task failed: {}", e)))?;
        Ok(result?)
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Resolve(ResolveError),
    InvalidInput(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Resolve(e) => {
                let kind = e.kind();
                let status = match kind {
                    ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, kind, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, ErrorKind::InvalidArgument, msg),
            ApiError::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, msg)
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: kind.as_str(),
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        ApiError::Resolve(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfoResponse {
    pub block: BlockSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksInfoResponse {
    pub blocks: Vec<BlockInfoResponse>,
}

/// Range request: `number` blocks starting at `height`. Missing fields
/// default to zero, which yields an empty range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlocksInfoRequest {
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub number: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetHeightRequest {
    #[serde(default)]
    pub stream: bool,
}

/// `Json` extractor whose rejections use the `ApiError` body.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Logs method, path, status, duration and current `NodeState` (when
/// available) for each request.
async fn logging_middleware(
    State(node): State<Arc<Node>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    let node_state = if let Some(s) = &node.state {
        format!("{:?}", s.read().await.clone())
    } else {
        "unknown".to_string()
    };

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        node_state = %node_state,
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    let timeout = node.request_timeout;

    Router::new()
        .route(routes::GET_BLOCK_INFO, post(get_block_info))
        .route(routes::GET_BLOCKS_INFO, post(get_blocks_info))
        .route(routes::GET_HEIGHT, post(get_height))
        .route(routes::HEALTH, get(health_check))
        .layer(middleware::from_fn_with_state(node.clone(), logging_middleware))
        .layer(TimeoutLayer::new(timeout))
        .with_state(node)
        .layer(cors)
}

/// Serve the API until the listener fails.
pub async fn run_api_server(
    node: Arc<Node>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(node);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "API server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match &node.state {
        Some(s) => {
            let state = s.read().await.clone();
            let status = if state == NodeState::Ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                Json(serde_json::json!({
                    "status": if status.is_success() { "healthy" } else { "unhealthy" },
                    "node_state": format!("{:?}", state),
                    "timestamp": timestamp
                })),
            )
                .into_response()
        }
        // No orchestrator state available; assume healthy
        None => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "timestamp": timestamp
            })),
        )
            .into_response(),
    }
}

async fn get_block_info(
    State(node): State<Arc<Node>>,
    ApiJson(spec): ApiJson<IdentifierSpec>,
) -> Result<Json<BlockInfoResponse>, ApiError> {
    let block = node
        .resolve(move |resolver| resolver.resolve_one(&spec))
        .await?;
    Ok(Json(BlockInfoResponse { block }))
}

async fn get_blocks_info(
    State(node): State<Arc<Node>>,
    ApiJson(req): ApiJson<BlocksInfoRequest>,
) -> Result<Json<BlocksInfoResponse>, ApiError> {
    if req.number > node.max_range_blocks {
        return Err(ApiError::InvalidInput(format!(
            "Cannot request more than {} blocks at once",
            node.max_range_blocks
        )));
    }

    let summaries = node
        .resolve(move |resolver| resolver.resolve_range(req.height, req.number))
        .await?;

    Ok(Json(BlocksInfoResponse {
        blocks: summaries
            .into_iter()
            .map(|block| BlockInfoResponse { block })
            .collect(),
    }))
}

async fn get_height(
    State(node): State<Arc<Node>>,
    body: Bytes,
) -> Result<Json<BlockInfoResponse>, ApiError> {
    // The body is optional; only an absent or blank one means defaults.
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        GetHeightRequest::default()
    } else {
        serde_json::from_slice::<GetHeightRequest>(&body)
            .map_err(|e| ApiError::InvalidInput(format!("Invalid request body: {}", e)))?
    };
    if req.stream {
        return Err(ApiError::InvalidInput(
            "Streaming head updates is not supported".to_string(),
        ));
    }

    let block = node.resolve(|resolver| resolver.resolve_latest()).await?;
    Ok(Json(BlockInfoResponse { block }))
}
