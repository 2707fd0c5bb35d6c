//! HTTP front for the metadata cache.
//!
//! GET /dicom_info?slice_file_path=<path> - cached or freshly parsed metadata.
//! GET /                                   - liveness payload.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::{
    identity::FileIdentity,
    metadata::MetadataRecord,
    metadata_cache::{CacheError, MetadataCache},
    source::SourceError,
    store::MetadataStore,
};

/// Metadata parser the handlers call on a cache miss.
pub type SharedParser =
    Arc<dyn Fn(&FileIdentity) -> Result<MetadataRecord, SourceError> + Send + Sync>;

/// Application state shared across handlers.
pub struct AppState {
    pub cache: MetadataCache<Arc<dyn MetadataStore + Send + Sync>>,
    pub parser: SharedParser,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/dicom_info", get(dicom_info_handler))
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn run_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    log::info!("serving DICOM metadata on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Deserialize)]
struct DicomInfoQuery {
    slice_file_path: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

enum ApiError {
    Cache(CacheError),
    Worker(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Cache(CacheError::SourceUnavailable(SourceError::NotFound { .. })) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Cache(CacheError::SourceUnavailable(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Cache(CacheError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Cache(_) | ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = match self {
            ApiError::Cache(err) => err.to_string(),
            ApiError::Worker(message) => message,
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

async fn dicom_info_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DicomInfoQuery>,
) -> Result<Json<MetadataRecord>, ApiError> {
    let lookup = tokio::task::spawn_blocking(move || -> Result<MetadataRecord, CacheError> {
        let identity = FileIdentity::resolve(&query.slice_file_path)?;
        state
            .cache
            .get_metadata(&identity, || (state.parser)(&identity))
    })
    .await
    .map_err(|err| {
        log::error!("dicom_info worker failed: {err}");
        ApiError::Worker(err.to_string())
    })?;

    match lookup {
        Ok(record) => Ok(Json(record)),
        Err(CacheError::Encoding {
            identity,
            record,
            source,
        }) => {
            log::warn!("metadata for {identity} not cached ({source}), serving computed record");
            Ok(Json(*record))
        }
        Err(err) => {
            log::warn!("dicom_info failed: {err}");
            Err(ApiError::Cache(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use axum::{body::Body, http::Request};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct DownStore;

    impl MetadataStore for DownStore {
        fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        fn get(&self, _key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }
    }

    fn state(store: Arc<dyn MetadataStore + Send + Sync>, parses: Arc<AtomicUsize>) -> Arc<AppState> {
        Arc::new(AppState {
            cache: MetadataCache::new(store),
            parser: Arc::new(move |identity: &FileIdentity| -> Result<MetadataRecord, SourceError> {
                parses.fetch_add(1, Ordering::SeqCst);
                Ok(MetadataRecord::new()
                    .with("file_path", identity.as_str())
                    .with("modality", "NM"))
            }),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = router(state(Arc::new(MemoryStore::new()), Arc::default()));
        let (status, body) = get_json(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn dicom_info_parses_once_then_serves_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.dcm");
        std::fs::write(&file, b"").unwrap();
        let uri = format!("/dicom_info?slice_file_path={}", file.display());

        let store = Arc::new(MemoryStore::new());
        let parses = Arc::new(AtomicUsize::new(0));
        let app = router(state(store.clone(), parses.clone()));

        let (status, first) = get_json(app.clone(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["modality"], "NM");

        let (status, second) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, second);
        assert_eq!(parses.load(Ordering::SeqCst), 1);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn dicom_info_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/dicom_info?slice_file_path={}",
            dir.path().join("absent.dcm").display()
        );
        let parses = Arc::new(AtomicUsize::new(0));
        let app = router(state(Arc::new(MemoryStore::new()), parses.clone()));

        let (status, body) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("absent.dcm"));
        assert_eq!(parses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dicom_info_store_outage_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.dcm");
        std::fs::write(&file, b"").unwrap();
        let uri = format!("/dicom_info?slice_file_path={}", file.display());

        let parses = Arc::new(AtomicUsize::new(0));
        let app = router(state(Arc::new(DownStore), parses.clone()));

        let (status, _) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(parses.load(Ordering::SeqCst), 0);
    }
}
