use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::instrument;

const MAX_STAMP_SUFFIX: u32 = 1000;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Staging directory {} is unavailable: {source}", .path.display())]
    DirectoryUnavailable { path: PathBuf, source: io::Error },
    #[error("Failed to write {}: {source}", .path.display())]
    WriteFailure { path: PathBuf, source: io::Error },
}

/// Location of a persisted upload together with the stamp its prediction reuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImagePath {
    pub stamp: String,
    pub path: PathBuf,
}

impl StagedImagePath {
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    // Held while a stamp is picked and its upload file created.
    allocation: Arc<Mutex<()>>,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            allocation: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure(&self) -> Result<(), StagingError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::DirectoryUnavailable {
                path: self.dir.clone(),
                source,
            })
    }

    pub fn prediction_path(&self, stamp: &str) -> PathBuf {
        self.dir.join(prediction_file_name(stamp))
    }

    /// Resolves a bare file name inside the staging directory. Anything that
    /// could escape the directory resolves to `None`.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let is_plain = !file_name.is_empty()
            && !file_name.starts_with('.')
            && !file_name.contains(['/', '\\']);
        is_plain.then(|| self.dir.join(file_name))
    }

    /// Writes `bytes` to `{stamp}_{filename}`. When the stamp is already used
    /// by another upload or prediction, `{stamp}-1`, `{stamp}-2`, ... are tried.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn stage_upload(
        &self,
        base_stamp: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StagedImagePath, StagingError> {
        let (staged, file) = {
            let _guard = self.allocation.lock().await;
            self.claim_stamp(base_stamp, filename).await?
        };

        if let Err(source) = write_and_sync(file, bytes).await {
            let _ = fs::remove_file(&staged.path).await;
            return Err(StagingError::WriteFailure {
                path: staged.path,
                source,
            });
        }

        Ok(staged)
    }

    /// Picks the first free stamp and creates its upload file. Callers hold
    /// `allocation` so no other upload can pick the same stamp meanwhile.
    async fn claim_stamp(
        &self,
        base_stamp: &str,
        filename: &str,
    ) -> Result<(StagedImagePath, fs::File), StagingError> {
        let taken = self
            .names_for(base_stamp)
            .await
            .map_err(|source| StagingError::DirectoryUnavailable {
                path: self.dir.clone(),
                source,
            })?;

        for suffix in 0..=MAX_STAMP_SUFFIX {
            let stamp = if suffix == 0 {
                base_stamp.to_string()
            } else {
                format!("{}-{}", base_stamp, suffix)
            };

            let upload_prefix = format!("{}_", stamp);
            let prediction = prediction_file_name(&stamp);
            if taken
                .iter()
                .any(|name| name.starts_with(&upload_prefix) || *name == prediction)
            {
                tracing::debug!("Stamp {} already in use", stamp);
                continue;
            }

            let path = self.dir.join(format!("{}{}", upload_prefix, filename));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((StagedImagePath { stamp, path }, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(StagingError::WriteFailure { path, source }),
            }
        }

        Err(StagingError::WriteFailure {
            path: self.dir.join(format!("{}_{}", base_stamp, filename)),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "no free stamp left for this second",
            ),
        })
    }

    /// Staged names that may belong to `base_stamp` or one of its suffixes.
    async fn names_for(&self, base_stamp: &str) -> io::Result<Vec<String>> {
        let prediction_prefix = format!("prediction_{}", base_stamp);
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(base_stamp) || name.starts_with(&prediction_prefix) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

fn prediction_file_name(stamp: &str) -> String {
    format!("prediction_{}.jpg", stamp)
}

async fn write_and_sync(mut file: fs::File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("nested").join("images"));

        area.ensure().await.unwrap();
        area.ensure().await.unwrap();

        assert!(area.dir().is_dir());
    }

    #[tokio::test]
    async fn test_ensure_fails_when_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("images");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = StagingArea::new(&blocker).ensure().await.unwrap_err();

        assert!(matches!(err, StagingError::DirectoryUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_stage_upload_writes_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let bytes = vec![0xFF, 0xD8, 0x00, 0x42, 0xFF, 0xD9];

        let staged = area
            .stage_upload("20250407_090503", "sample1.jpg", &bytes)
            .await
            .unwrap();

        assert_eq!(staged.stamp, "20250407_090503");
        assert_eq!(staged.file_name(), "20250407_090503_sample1.jpg");
        assert_eq!(std::fs::read(&staged.path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_same_second_uploads_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let first = area
            .stage_upload("20250407_090503", "scan.jpg", b"first")
            .await
            .unwrap();
        let second = area
            .stage_upload("20250407_090503", "scan.jpg", b"second")
            .await
            .unwrap();
        let third = area
            .stage_upload("20250407_090503", "other.png", b"third")
            .await
            .unwrap();

        assert_eq!(second.stamp, "20250407_090503-1");
        assert_eq!(third.stamp, "20250407_090503-2");
        assert_eq!(std::fs::read(&first.path).unwrap(), b"first");
        assert_eq!(std::fs::read(&second.path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_existing_prediction_reserves_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        std::fs::write(area.prediction_path("20250407_090503"), b"jpg").unwrap();

        let staged = area
            .stage_upload("20250407_090503", "scan.jpg", b"data")
            .await
            .unwrap();

        assert_eq!(staged.stamp, "20250407_090503-1");
    }

    #[tokio::test]
    async fn test_concurrent_uploads_get_distinct_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let other = area.clone();

        let (a, b) = tokio::join!(
            area.stage_upload("20250407_090503", "a.jpg", b"a"),
            other.stage_upload("20250407_090503", "b.jpg", b"b"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.stamp, b.stamp);
        let mut stamps = vec![a.stamp, b.stamp];
        stamps.sort();
        assert_eq!(stamps, vec!["20250407_090503", "20250407_090503-1"]);
        assert_eq!(std::fs::read(&a.path).unwrap(), b"a");
        assert_eq!(std::fs::read(&b.path).unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_unwritable_name_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let filename = format!("{}.jpg", "a".repeat(250));

        let err = area
            .stage_upload("20250407_090503", &filename, b"data")
            .await
            .unwrap_err();

        assert!(matches!(err, StagingError::WriteFailure { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let area = StagingArea::new("images");

        assert_eq!(
            area.resolve("prediction_20250407_090503.jpg"),
            Some(PathBuf::from("images/prediction_20250407_090503.jpg"))
        );
        assert_eq!(area.resolve("../secret"), None);
        assert_eq!(area.resolve("a/b.jpg"), None);
        assert_eq!(area.resolve(".."), None);
        assert_eq!(area.resolve(""), None);
    }
}
