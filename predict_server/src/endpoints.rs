//! Endpoints of HTTP server.
//!
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartRejection},
        DefaultBodyLimit,
    },
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use common::protocol::{Detection, FILE_FIELD, PREDICT_ROUTE};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::{PredictError, ProcessingError},
    meter::METER,
    nn::{InferModel, ModelHandle},
};

/// Build the HTTP router serving predictions with `model`.
pub fn router(model: ModelHandle, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route(PREDICT_ROUTE, post(predict))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(model))
}

/// Health check endpoint.
pub async fn healthcheck(Extension(model): Extension<ModelHandle>) -> (StatusCode, &'static str) {
    match model.is_loaded() {
        true => (StatusCode::OK, "healthy"),
        false => (StatusCode::SERVICE_UNAVAILABLE, "model not loaded"),
    }
}

/// Run object detection on the image uploaded in the `file` field.
pub async fn predict(
    Extension(model): Extension<ModelHandle>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Vec<Detection>>, PredictError> {
    let model = model.get().ok_or(PredictError::ModelUnavailable)?;

    let mut multipart = multipart.map_err(|rejection| {
        log::debug!("Request without multipart body: {rejection}");
        PredictError::MissingFile
    })?;
    let (file_name, data) = read_upload(&mut multipart).await?;
    log::debug!("Received {} ({} bytes)", &file_name, data.len());

    let detections =
        tokio::task::spawn_blocking(move || detect_on_bytes(model.as_ref(), &data))
            .await
            .map_err(ProcessingError::from)??;

    log::info!("Found {} detections in {}", detections.len(), &file_name);
    METER.tick_prediction(detections.len());

    Ok(Json(detections))
}

/// Find the first file part named `file` and read its content.
///
/// Parts without a filename are plain form values and do not count as a file.
async fn read_upload(multipart: &mut Multipart) -> Result<(String, Bytes), PredictError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(PredictError::MissingFile),
            // The body limit fails the stream before any part is seen
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ProcessingError::Read(err).into());
            }
            Err(err) => {
                log::debug!("Malformed multipart body: {err}");
                return Err(PredictError::MissingFile);
            }
        };

        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(PredictError::EmptyFilename);
        }

        let data = field.bytes().await.map_err(ProcessingError::from)?;
        return Ok((file_name, data));
    }
}

/// Decode `bytes` as an image and run the detector on it.
pub fn detect_on_bytes(
    model: &dyn InferModel,
    bytes: &[u8],
) -> Result<Vec<Detection>, ProcessingError> {
    let image = image::load_from_memory(bytes)?;
    model.run(&image).map_err(ProcessingError::Inference)
}
