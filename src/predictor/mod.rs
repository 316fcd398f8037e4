mod annotate;
mod hosted;

pub use annotate::{annotate, Detection, DetectionPoint};
pub use hosted::HostedPredictor;

use async_trait::async_trait;
use bytes::Bytes;
use std::{io, path::Path};
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("Failed to read image {path}: {source}")]
    ReadImage { path: String, source: io::Error },
    #[error("Request to segmentation service failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Segmentation service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response from segmentation service: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("Failed to encode annotated image: {0}")]
    Encode(image::ImageError),
    #[error("Failed to save annotated image: {0}")]
    Save(io::Error),
}

/// Thresholds forwarded to the model, both percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionParams {
    pub confidence: u8,
    pub overlap: u8,
}

impl Default for PredictionParams {
    fn default() -> Self {
        Self {
            confidence: 40,
            overlap: 30,
        }
    }
}

/// Encoded JPEG produced by a predictor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedImage {
    bytes: Bytes,
}

impl AnnotatedImage {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Writes to a `.part` sibling first and renames, so `path` either holds
    /// the whole image or does not exist.
    pub async fn save(&self, path: &Path) -> io::Result<()> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = Path::new(&partial);

        let result = async {
            fs::write(partial, &self.bytes).await?;
            fs::rename(partial, path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(partial).await;
        }
        result
    }
}

#[async_trait]
pub trait Predictor: Send + Sync + 'static {
    async fn predict(
        &self,
        image: &Path,
        params: PredictionParams,
    ) -> Result<AnnotatedImage, PredictorError>;
}
