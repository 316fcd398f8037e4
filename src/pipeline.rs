use crate::{
    clock::{self, Clock, SystemClock},
    intake::UploadedImage,
    predictor::{PredictionParams, Predictor, PredictorError},
    staging::{file_name_of, StagedImagePath, StagingArea, StagingError},
};
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::instrument;

pub const PREDICTION_FAILED_MESSAGE: &str =
    "Prediction failed. Please ensure the image is a valid OCT scan.";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Staging directory {} is unavailable: {source}", .path.display())]
    DirectoryUnavailable { path: PathBuf, source: io::Error },
    #[error("Failed to persist upload to {}: {source}", .path.display())]
    WriteFailure { path: PathBuf, source: io::Error },
    #[error("Prediction failed for {}: {source}", .staged.path.display())]
    PredictionFailure {
        staged: StagedImagePath,
        source: PredictorError,
    },
}

impl From<StagingError> for PipelineError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::DirectoryUnavailable { path, source } => {
                PipelineError::DirectoryUnavailable { path, source }
            }
            StagingError::WriteFailure { path, source } => {
                PipelineError::WriteFailure { path, source }
            }
        }
    }
}

/// Annotated output of a successful invocation, already on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub path: PathBuf,
    pub content: bytes::Bytes,
}

impl PredictionResult {
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

/// Stages an upload, runs the predictor on it and stages the annotated result.
#[derive(Clone)]
pub struct Pipeline {
    staging: StagingArea,
    predictor: Arc<dyn Predictor>,
    params: PredictionParams,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        staging: StagingArea,
        predictor: Arc<dyn Predictor>,
        params: PredictionParams,
    ) -> Self {
        Self::with_clock(staging, predictor, params, Arc::new(SystemClock))
    }

    pub fn with_clock(
        staging: StagingArea,
        predictor: Arc<dyn Predictor>,
        params: PredictionParams,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            staging,
            predictor,
            params,
            clock,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    #[instrument(skip(self, upload), fields(filename = upload.filename()))]
    pub async fn process(
        &self,
        upload: UploadedImage,
    ) -> Result<(StagedImagePath, PredictionResult), PipelineError> {
        self.staging.ensure().await?;

        let stamp = clock::stamp(&self.clock.now());
        let staged = self
            .staging
            .stage_upload(&stamp, upload.filename(), upload.bytes())
            .await?;
        drop(upload);
        tracing::info!("Upload staged at {}", staged.path.display());

        let output_path = self.staging.prediction_path(&staged.stamp);
        let outcome = async {
            let annotated = self.predictor.predict(&staged.path, self.params).await?;
            annotated
                .save(&output_path)
                .await
                .map_err(PredictorError::Save)?;
            Ok::<_, PredictorError>(annotated)
        }
        .await;

        match outcome {
            Ok(annotated) => {
                tracing::info!("Prediction saved at {}", output_path.display());
                let result = PredictionResult {
                    path: output_path,
                    content: annotated.bytes().clone(),
                };
                Ok((staged, result))
            }
            Err(source) => {
                tracing::error!(
                    "Prediction failed for {}: {}",
                    staged.path.display(),
                    source
                );
                Err(PipelineError::PredictionFailure { staged, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::predictor::AnnotatedImage;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::{
        path::Path,
        sync::{atomic::AtomicUsize, atomic::Ordering, Mutex},
    };

    const ANNOTATED: &[u8] = b"annotated-jpeg";

    #[derive(Default)]
    struct MockPredictor {
        calls: AtomicUsize,
        seen: Mutex<Vec<(PathBuf, PredictionParams)>>,
    }

    #[async_trait]
    impl Predictor for MockPredictor {
        async fn predict(
            &self,
            image: &Path,
            params: PredictionParams,
        ) -> Result<AnnotatedImage, PredictorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((image.to_path_buf(), params));
            Ok(AnnotatedImage::new(Bytes::from_static(ANNOTATED)))
        }
    }

    struct FailingPredictor;

    #[async_trait]
    impl Predictor for FailingPredictor {
        async fn predict(
            &self,
            image: &Path,
            _params: PredictionParams,
        ) -> Result<AnnotatedImage, PredictorError> {
            let data = tokio::fs::read(image).await.unwrap();
            let err = image::load_from_memory(&data).unwrap_err();
            Err(PredictorError::Decode(err))
        }
    }

    fn pipeline_with(
        dir: &Path,
        predictor: Arc<dyn Predictor>,
        clock: Arc<FixedClock>,
    ) -> Pipeline {
        Pipeline::with_clock(
            StagingArea::new(dir.join("images")),
            predictor,
            PredictionParams::default(),
            clock,
        )
    }

    fn upload(name: &str, bytes: &'static [u8]) -> UploadedImage {
        UploadedImage::new(name, Bytes::from_static(bytes)).unwrap()
    }

    fn staged_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.join("images"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_successful_prediction_uses_upload_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Arc::new(MockPredictor::default());
        let clock = Arc::new(FixedClock::at(2025, 4, 7, 9, 5, 3));
        let pipeline = pipeline_with(dir.path(), predictor.clone(), clock);

        let (staged, result) = pipeline
            .process(upload("sample1.jpg", b"\xFF\xD8oct\xFF\xD9"))
            .await
            .unwrap();

        assert_eq!(staged.file_name(), "20250407_090503_sample1.jpg");
        assert_eq!(result.file_name(), "prediction_20250407_090503.jpg");
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"\xFF\xD8oct\xFF\xD9");
        assert_eq!(std::fs::read(&result.path).unwrap(), ANNOTATED);
        assert_eq!(result.content.as_ref(), ANNOTATED);
        assert_eq!(
            staged_files(dir.path()),
            vec![
                "20250407_090503_sample1.jpg".to_string(),
                "prediction_20250407_090503.jpg".to_string()
            ]
        );

        let seen = predictor.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, staged.path);
        assert_eq!(seen[0].1, PredictionParams { confidence: 40, overlap: 30 });
    }

    #[tokio::test]
    async fn test_failed_prediction_keeps_upload_only() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at(2025, 4, 7, 9, 5, 3));
        let pipeline = pipeline_with(dir.path(), Arc::new(FailingPredictor), clock);

        let err = pipeline
            .process(upload("corrupt.jpg", b"not really a jpeg"))
            .await
            .unwrap_err();

        match err {
            PipelineError::PredictionFailure { staged, source } => {
                assert!(matches!(source, PredictorError::Decode(_)));
                assert_eq!(std::fs::read(&staged.path).unwrap(), b"not really a jpeg");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            staged_files(dir.path()),
            vec!["20250407_090503_corrupt.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_repeated_uploads_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Arc::new(MockPredictor::default());
        let clock = Arc::new(FixedClock::at(2025, 4, 7, 9, 5, 3));
        let pipeline = pipeline_with(dir.path(), predictor.clone(), clock.clone());

        let (first, first_result) = pipeline.process(upload("scan.png", b"same")).await.unwrap();
        clock.advance_secs(2);
        let (second, second_result) = pipeline.process(upload("scan.png", b"same")).await.unwrap();
        let (third, third_result) = pipeline.process(upload("scan.png", b"same")).await.unwrap();

        assert_eq!(first.stamp, "20250407_090503");
        assert_eq!(second.stamp, "20250407_090505");
        assert_eq!(third.stamp, "20250407_090505-1");
        assert_ne!(second_result.path, third_result.path);
        assert_ne!(first_result.path, second_result.path);
        assert_eq!(staged_files(dir.path()).len(), 6);
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_same_second_uploads_keep_separate_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Arc::new(MockPredictor::default());
        let clock = Arc::new(FixedClock::at(2025, 4, 7, 9, 5, 3));
        let pipeline = pipeline_with(dir.path(), predictor.clone(), clock);

        let (a, b) = tokio::join!(
            pipeline.process(upload("a.jpg", b"a")),
            pipeline.process(upload("b.jpg", b"b")),
        );
        let ((a_staged, a_result), (b_staged, b_result)) = (a.unwrap(), b.unwrap());

        assert_ne!(a_staged.stamp, b_staged.stamp);
        assert_ne!(a_result.path, b_result.path);
        assert_eq!(staged_files(dir.path()).len(), 4);
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_failure_skips_predictor() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Arc::new(MockPredictor::default());
        let clock = Arc::new(FixedClock::at(2025, 4, 7, 9, 5, 3));
        let pipeline = pipeline_with(dir.path(), predictor.clone(), clock);
        let filename = format!("{}.jpg", "a".repeat(250));

        let err = pipeline
            .process(upload(&filename, b"data"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::WriteFailure { .. }));
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 0);
        assert!(staged_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("images"), b"occupied").unwrap();
        let predictor = Arc::new(MockPredictor::default());
        let clock = Arc::new(FixedClock::at(2025, 4, 7, 9, 5, 3));
        let pipeline = pipeline_with(dir.path(), predictor.clone(), clock);

        let err = pipeline
            .process(upload("scan.jpg", b"data"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::DirectoryUnavailable { .. }));
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 0);
    }
}
