use crate::{intake::content_type_for, server::SharedState};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::io;
use tracing::instrument;

#[instrument(skip_all, fields(file_name = %file_name))]
pub async fn staged_image(
    State(state): State<SharedState>,
    Path(file_name): Path<String>,
) -> Response {
    let Some(path) = state.pipeline.staging().resolve(&file_name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default();
            ([(header::CONTENT_TYPE, content_type_for(&extension))], bytes).into_response()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Failed to read {}: {}", path.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
