use crate::{
    classifier::{ClassifierError, Prediction},
    server::SharedState,
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("invalid multipart upload: {0}")]
    Upload(String),
    #[error("no `file` field in multipart form")]
    MissingFile,
    #[error("classification failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("inference task failed: {0}")]
    Task(String),
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {}", self),
        )
            .into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, PredictError> {
    let mut image_data: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictError::Upload(e.to_string()))?
    {
        if field.name() == Some("file") {
            image_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| PredictError::Upload(e.to_string()))?,
            );
            break;
        }
    }
    let image_data = image_data.ok_or(PredictError::MissingFile)?;

    state.metrics.record_request("/predict");
    let started = Instant::now();

    // Decode and inference are blocking, so they run off the async runtime.
    let classifier = state.classifier.clone();
    let prediction = tokio::task::spawn_blocking(move || classifier.classify(&image_data))
        .await
        .map_err(|e| PredictError::Task(e.to_string()))??;

    state
        .metrics
        .record_inference_duration(started.elapsed().as_millis() as u64, "/predict");

    tracing::debug!(
        "Predicted {} with confidence {:.3}",
        prediction.class,
        prediction.confidence
    );

    Ok(Json(prediction))
}
