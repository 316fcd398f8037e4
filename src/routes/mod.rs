mod feedback;
mod health;
mod images;
mod metrics;
mod predict_image;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health_check", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/predict", post(predict_image::predict_image))
        .route("/images/{file_name}", get(images::staged_image))
        .route("/feedback", post(feedback::submit_feedback))
}
