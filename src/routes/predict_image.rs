use crate::{
    intake::{IntakeError, UploadedImage},
    pipeline::{PipelineError, PREDICTION_FAILED_MESSAGE},
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/predict";
const FILE_FIELD: &str = "file";
const UPLOAD_NOT_STORED_MESSAGE: &str = "The upload could not be stored. Please try again later.";

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("No image found in the `file` field")]
    MissingFile,
    #[error(transparent)]
    Intake(#[from] IntakeError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Serialize)]
pub struct PredictionResponse {
    pub status: &'static str,
    pub uploaded_image: String,
    pub prediction_image: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_image: Option<String>,
}

impl ErrorResponse {
    fn message(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            detail: None,
            uploaded_image: None,
        }
    }
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            PredictImageError::Multipart(ref e) => (e.status(), ErrorResponse::message(&self)),
            PredictImageError::MissingFile | PredictImageError::Intake(_) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::message(&self))
            }
            PredictImageError::Pipeline(PipelineError::PredictionFailure { staged, source }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: PREDICTION_FAILED_MESSAGE.to_string(),
                    detail: Some(source.to_string()),
                    uploaded_image: Some(staged.file_name()),
                },
            ),
            PredictImageError::Pipeline(e) => {
                tracing::error!("Upload could not be staged: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::message(UPLOAD_NOT_STORED_MESSAGE),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

async fn read_upload(multipart: &mut Multipart) -> Result<UploadedImage, PredictImageError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or(PredictImageError::MissingFile)?;
        let bytes = field.bytes().await?;
        return Ok(UploadedImage::new(&filename, bytes)?);
    }
    Err(PredictImageError::MissingFile)
}

#[instrument(skip_all)]
pub async fn predict_image(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictImageError> {
    state.metrics.record_request(ROUTE);

    let upload = read_upload(&mut multipart).await?;

    let start = Instant::now();
    let outcome = state.pipeline.process(upload).await;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);

    match outcome {
        Ok((staged, prediction)) => Ok(Json(PredictionResponse {
            status: "complete",
            uploaded_image: staged.file_name(),
            prediction_image: prediction.file_name(),
        })),
        Err(e) => {
            if matches!(e, PipelineError::PredictionFailure { .. }) {
                state.metrics.record_prediction_failure(ROUTE);
            }
            Err(e.into())
        }
    }
}
