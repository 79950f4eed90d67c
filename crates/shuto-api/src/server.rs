//! HTTP server for the image and file endpoints
//!
//! Provides /health, /v2/list/*path, /v2/image/*path and /v2/download/*path.

use crate::config::API_VERSION;
use crate::error::ApiError;
use crate::imaging::{ImageProcessor, TransformOptions, TransformQuery};
use crate::storage::{join_listing_path, sanitize_path, RemoteStorage};
use crate::types::{
    ApiConfig, CachePolicy, CachesHealth, FileResponse, HealthResponse, ImageDimensions,
    RemoteFile,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::error::Error as StdError;
use std::sync::Arc;
use swr_cache::{CacheOptions, GetCachedOptions, SwrCache};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

/// Dimension lookups run at once for one listing. A cold lookup downloads the file.
const DIMENSION_LOOKUPS: usize = 8;

/// Shared state for the HTTP server
pub struct ServerState {
    pub storage: Arc<dyn RemoteStorage>,
    pub images: Arc<dyn ImageProcessor>,
    /// Dimensions of remote images, keyed by domain and path
    pub dimensions: SwrCache<ImageDimensions>,
    pub listings: SwrCache<Arc<Vec<RemoteFile>>>,
    pub dimensions_policy: CachePolicy,
    pub listing_policy: CachePolicy,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        images: Arc<dyn ImageProcessor>,
        config: &ApiConfig,
    ) -> swr_cache::Result<Self> {
        Ok(Self {
            storage,
            images,
            dimensions: SwrCache::new(CacheOptions {
                max_size: config.dimensions_cache.max_size,
            })?,
            listings: SwrCache::new(CacheOptions {
                max_size: config.listing_cache.max_size,
            })?,
            dimensions_policy: config.dimensions_cache,
            listing_policy: config.listing_cache,
            started_at: Utc::now(),
        })
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(&format!("/{}/list/", API_VERSION), get(list_root))
        .route(&format!("/{}/list/{{*path}}", API_VERSION), get(list))
        .route(&format!("/{}/image/{{*path}}", API_VERSION), get(get_image))
        .route(&format!("/{}/download/{{*path}}", API_VERSION), get(download))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        caches: CachesHealth {
            dimensions: state.dimensions.stats(),
            listings: state.listings.stats(),
        },
    })
}

async fn list_root(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    list_files(&state, &request_domain(&headers), "").await.map(Json)
}

async fn list(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    list_files(&state, &request_domain(&headers), &path).await.map(Json)
}

/// List a directory, adding dimensions for every image in it
async fn list_files(
    state: &ServerState,
    domain: &str,
    path: &str,
) -> Result<Vec<FileResponse>, ApiError> {
    let dir = sanitize_path(path)?;
    debug!(domain, path = %dir, "Processing list request");

    let files = cached_listing(state, domain, &dir).await.map_err(|e| {
        error!(domain, path = %dir, error = %e, "Failed to list directory contents");
        ApiError::from(e)
    })?;

    let dir = dir.as_str();
    let lookups: Vec<_> = files
        .iter()
        .map(|file| describe_file(state, domain, dir, file))
        .collect();
    let responses: Vec<FileResponse> = stream::iter(lookups)
    .buffered(DIMENSION_LOOKUPS)
    .collect()
    .await;

    debug!(path = %dir, count = responses.len(), "Successfully listed directory");
    Ok(responses)
}

/// Build the response for one listed file, adding dimensions for images
async fn describe_file(
    state: &ServerState,
    domain: &str,
    dir: &str,
    file: &RemoteFile,
) -> FileResponse {
    let mut response = FileResponse::from(file);
    if file.is_image() {
        let image_path = join_listing_path(dir, &file.path);
        match cached_dimensions(state, domain, &image_path).await {
            Ok(dimensions) => {
                response.width = Some(dimensions.width);
                response.height = Some(dimensions.height);
            }
            Err(e) => {
                debug!(path = %image_path, error = %e, "Skipping dimensions");
            }
        }
    }
    response
}

async fn cached_listing(
    state: &ServerState,
    domain: &str,
    dir: &str,
) -> swr_cache::Result<Arc<Vec<RemoteFile>>> {
    let storage = Arc::clone(&state.storage);
    let (domain, dir) = (domain.to_string(), dir.to_string());
    let options = cache_options(&state.listing_policy, &domain, &dir);

    state
        .listings
        .get_cached(options, move || async move {
            storage.list(&dir, &domain).await.map(Arc::new)
        })
        .await
}

async fn cached_dimensions(
    state: &ServerState,
    domain: &str,
    path: &str,
) -> swr_cache::Result<ImageDimensions> {
    let storage = Arc::clone(&state.storage);
    let images = Arc::clone(&state.images);
    let (domain, path) = (domain.to_string(), path.to_string());
    let options = cache_options(&state.dimensions_policy, &domain, &path);

    state
        .dimensions
        .get_cached(options, move || async move {
            let data = storage.fetch(&path, &domain).await?;
            let dimensions = images.dimensions(&data)?;
            Ok::<_, Box<dyn StdError + Send + Sync>>(dimensions)
        })
        .await
}

fn cache_options(policy: &CachePolicy, domain: &str, path: &str) -> GetCachedOptions {
    GetCachedOptions::new(format!("{}:{}", domain, path), policy.ttl).stale_time(policy.stale_time)
}

/// Fetch an image and apply the requested transformations
async fn get_image(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Query(query): Query<TransformQuery>,
) -> Result<Response, ApiError> {
    let domain = request_domain(&headers);
    let options = TransformOptions::try_from(&query)?;
    debug!(domain = %domain, path = %path, ?options, "Processing image request");

    let data = state.storage.fetch(&path, &domain).await.map_err(|e| {
        error!(domain = %domain, path = %path, error = %e, "Failed to fetch image");
        ApiError::from(e)
    })?;

    if !query.requests_transform() {
        let content_type = state
            .images
            .mime_type(&data)
            .unwrap_or("application/octet-stream");
        return Ok(file_response(
            data,
            content_type,
            file_name(&path),
            options.force_download,
        ));
    }

    let images = Arc::clone(&state.images);
    let transform_options = options.clone();
    let output = tokio::task::spawn_blocking(move || images.transform(&data, &transform_options))
        .await
        .map_err(|e| ApiError::Internal(format!("Image transform task failed: {}", e)))??;

    let name = replace_extension(file_name(&path), options.format.extension());
    Ok(file_response(
        output,
        options.format.mime_type(),
        &name,
        options.force_download,
    ))
}

/// Serve the original file as an attachment
async fn download(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let domain = request_domain(&headers);
    debug!(domain = %domain, path = %path, "Processing download request");

    let data = state.storage.fetch(&path, &domain).await.map_err(|e| {
        error!(domain = %domain, path = %path, error = %e, "Failed to fetch file");
        ApiError::from(e)
    })?;

    let content_type = state
        .images
        .mime_type(&data)
        .unwrap_or("application/octet-stream");
    Ok(file_response(data, content_type, file_name(&path), true))
}

fn file_response(
    data: Vec<u8>,
    content_type: &'static str,
    name: &str,
    attachment: bool,
) -> Response {
    let mut response = (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        data,
    )
        .into_response();

    if attachment {
        let disposition = format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(name)
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }

    response
}

/// Domain the request was addressed to, from the Host header without port
fn request_domain(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| host.rsplit_once(':').map_or(host, |(name, _)| name))
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
}

fn replace_extension(name: &str, extension: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    format!("{}.{}", stem, extension)
}
