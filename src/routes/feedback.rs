use crate::{feedback::FeedbackError, server::SharedState};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub rating: i64,
    #[serde(default)]
    pub comments: String,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    status: &'static str,
}

#[derive(Error, Debug)]
pub enum SubmitFeedbackError {
    #[error("Malformed feedback: {}", .0.body_text())]
    Payload(#[from] JsonRejection),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
}

impl IntoResponse for SubmitFeedbackError {
    fn into_response(self) -> Response {
        let status = match self {
            SubmitFeedbackError::Payload(_)
            | SubmitFeedbackError::Feedback(FeedbackError::InvalidRating(_)) => {
                StatusCode::BAD_REQUEST
            }
            SubmitFeedbackError::Feedback(FeedbackError::Write { .. }) => {
                tracing::error!("{}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[instrument(skip_all)]
pub async fn submit_feedback(
    State(state): State<SharedState>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FeedbackResponse>), SubmitFeedbackError> {
    state.metrics.record_request("/feedback");

    let Json(request) = payload?;
    let rating = u8::try_from(request.rating)
        .map_err(|_| FeedbackError::InvalidRating(request.rating))?;

    state.feedback.append(rating, &request.comments).await?;
    state.metrics.record_feedback(rating);

    Ok((
        StatusCode::CREATED,
        Json(FeedbackResponse { status: "recorded" }),
    ))
}
