use crate::clock::{Clock, SystemClock, FEEDBACK_FORMAT};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::instrument;

pub const FEEDBACK_HEADER: &str = "timestamp,rating,comments\n";

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),
    #[error("Failed to write feedback log {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Append-only CSV log of user feedback.
pub struct FeedbackLog {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one `timestamp,rating,comments` line, writing the header first
    /// when the log does not exist yet. Returns the line written.
    #[instrument(skip(self, comments))]
    pub async fn append(&self, rating: u8, comments: &str) -> Result<String, FeedbackError> {
        if !(1..=5).contains(&rating) {
            return Err(FeedbackError::InvalidRating(rating.into()));
        }

        let line = format!(
            "{},{},{}\n",
            self.clock.now().format(FEEDBACK_FORMAT),
            rating,
            csv_field(comments)
        );

        let _guard = self.lock.lock().await;
        self.write_line(&line)
            .await
            .map_err(|source| FeedbackError::Write {
                path: self.path.clone(),
                source,
            })?;

        tracing::info!("Feedback recorded with rating {}", rating);
        Ok(line)
    }

    async fn write_line(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = match fs::OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                file.write_all(FEEDBACK_HEADER.as_bytes()).await?;
                file
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                fs::OpenOptions::new()
                    .append(true)
                    .open(&self.path)
                    .await?
            }
            Err(e) => return Err(e),
        };

        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
