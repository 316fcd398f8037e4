use super::{annotate, AnnotatedImage, Detection, PredictionParams, Predictor, PredictorError};
use crate::config::PredictorConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client};
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tokio::fs;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct SegmentationResponse {
    #[serde(default)]
    predictions: Vec<Detection>,
}

/// Client for the hosted segmentation model. The image is posted base64
/// encoded and the returned instances are drawn locally.
pub struct HostedPredictor {
    client: Client,
    model_url: String,
    api_key: String,
    workspace: String,
}

impl HostedPredictor {
    pub fn new(config: &PredictorConfig) -> Result<Self, PredictorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let model_url = config.get_model_url();
        tracing::info!(
            "Segmentation model configured: workspace={}, model={}",
            config.workspace,
            model_url
        );

        Ok(Self {
            client,
            model_url,
            api_key: config.api_key.clone(),
            workspace: config.workspace.clone(),
        })
    }

    async fn request_detections(
        &self,
        image_data: &[u8],
        params: PredictionParams,
    ) -> Result<Vec<Detection>, PredictorError> {
        let confidence = params.confidence.to_string();
        let overlap = params.overlap.to_string();

        let response = self
            .client
            .post(&self.model_url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("confidence", confidence.as_str()),
                ("overlap", overlap.as_str()),
                ("format", "json"),
            ])
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(STANDARD.encode(image_data))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PredictorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let parsed: SegmentationResponse = serde_json::from_slice(&body)?;
        Ok(parsed.predictions)
    }
}

#[async_trait]
impl Predictor for HostedPredictor {
    #[instrument(skip(self))]
    async fn predict(
        &self,
        image: &Path,
        params: PredictionParams,
    ) -> Result<AnnotatedImage, PredictorError> {
        let image_data = fs::read(image)
            .await
            .map_err(|source| PredictorError::ReadImage {
                path: image.display().to_string(),
                source,
            })?;

        let detections = self.request_detections(&image_data, params).await?;
        tracing::debug!(
            "Received {} detections from workspace {}",
            detections.len(),
            self.workspace
        );
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class={}, confidence={:.3}, centre=({:.1}, {:.1}), points={}",
                i,
                detection.class_label,
                detection.confidence,
                detection.x,
                detection.y,
                detection.points.len()
            );
        }

        let annotated = annotate(&image_data, &detections)?;
        Ok(AnnotatedImage::new(annotated))
    }
}
