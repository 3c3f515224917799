use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::errors::{MriSegError, Result};
use crate::response::{ClassifyResponse, HealthResponse, SegmentResponse};
use crate::traits::{VolumeClassificationModel, VolumeSegmentationModel};
use crate::upload::persist_upload;
use crate::{Classification, MriService, SegmentationReport};

type SharedService<S, C> = Arc<MriService<S, C>>;

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

pub fn router<S, C>(service: SharedService<S, C>) -> Router
where
    S: VolumeSegmentationModel + 'static,
    C: VolumeClassificationModel + 'static,
{
    let body_limit = service.config().body_limit_bytes();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/segment", post(segment::<S, C>))
        .route("/classify", post(classify::<S, C>))
        .route("/health", get(health::<S, C>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve<S, C>(service: SharedService<S, C>) -> Result<()>
where
    S: VolumeSegmentationModel + 'static,
    C: VolumeClassificationModel + 'static,
{
    let addr = service.config().socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MriSegError::Configuration {
            message: format!("failed to bind {}: {}", addr, e),
        })?;
    info!(%addr, "listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
        })
        .await
        .map_err(|e| MriSegError::Configuration {
            message: format!("server stopped: {}", e),
        })
}

async fn segment<S, C>(
    State(service): State<SharedService<S, C>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Json<SegmentResponse>
where
    S: VolumeSegmentationModel + 'static,
    C: VolumeClassificationModel + 'static,
{
    match run_segment(service, multipart.map_err(rejected_upload)).await {
        Ok(report) => Json(SegmentResponse::success(report.classes, report.images)),
        Err(err) => {
            error!(error = %err.chain_message(), "segmentation request failed");
            Json(SegmentResponse::from(&err))
        }
    }
}

async fn classify<S, C>(
    State(service): State<SharedService<S, C>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Json<ClassifyResponse>
where
    S: VolumeSegmentationModel + 'static,
    C: VolumeClassificationModel + 'static,
{
    match run_classify(service, multipart.map_err(rejected_upload)).await {
        Ok(classification) => Json(ClassifyResponse::success(classification)),
        Err(err) => {
            error!(error = %err.chain_message(), "classification request failed");
            Json(ClassifyResponse::from(&err))
        }
    }
}

async fn health<S, C>(State(service): State<SharedService<S, C>>) -> Json<HealthResponse>
where
    S: VolumeSegmentationModel + 'static,
    C: VolumeClassificationModel + 'static,
{
    Json(HealthResponse {
        status: "ok",
        classification_enabled: service.classification_enabled(),
    })
}

async fn run_segment<S, C>(service: SharedService<S, C>, multipart: Result<Multipart>) -> Result<SegmentationReport>
where
    S: VolumeSegmentationModel + 'static,
    C: VolumeClassificationModel + 'static,
{
    let (file_name, bytes) = read_file_field(&mut multipart?).await?;

    // the scratch file lives until the closure returns, whatever the outcome
    tokio::task::spawn_blocking(move || {
        let upload = persist_upload(&service.config().upload_dir, file_name.as_deref(), &bytes)?;
        service.segment_file(upload.path())
    })
    .await
    .map_err(|e| MriSegError::model("segmentation task", e))?
}

async fn run_classify<S, C>(service: SharedService<S, C>, multipart: Result<Multipart>) -> Result<Classification>
where
    S: VolumeSegmentationModel + 'static,
    C: VolumeClassificationModel + 'static,
{
    if !service.classification_enabled() {
        return Err(MriSegError::Configuration {
            message: "no classification model is configured".to_string(),
        });
    }
    let (file_name, bytes) = read_file_field(&mut multipart?).await?;

    tokio::task::spawn_blocking(move || {
        let upload = persist_upload(&service.config().upload_dir, file_name.as_deref(), &bytes)?;
        service.classify_file(upload.path())
    })
    .await
    .map_err(|e| MriSegError::model("classification task", e))?
}

/// A missing or malformed multipart body is reported like any other bad upload.
fn rejected_upload(rejection: MultipartRejection) -> MriSegError {
    MriSegError::Upload {
        reason: rejection.body_text(),
    }
}

/// Returns the client's file name and the contents of the `file` field.
async fn read_file_field(multipart: &mut Multipart) -> Result<(Option<String>, Bytes)> {
    let upload_error = |e: axum::extract::multipart::MultipartError| MriSegError::Upload {
        reason: e.body_text(),
    };

    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() == Some(FILE_FIELD) {
            let file_name = field.file_name().map(str::to_owned);
            let bytes = field.bytes().await.map_err(upload_error)?;
            return Ok((file_name, bytes));
        }
    }

    Err(MriSegError::Upload {
        reason: format!("multipart field `{}` is missing", FILE_FIELD),
    })
}
