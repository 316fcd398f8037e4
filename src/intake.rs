use bytes::Bytes;
use thiserror::Error;

pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug, PartialEq)]
pub enum IntakeError {
    #[error("Upload is empty")]
    EmptyUpload,
    #[error("Filename {0:?} cannot be stored")]
    InvalidFilename(String),
    #[error("Unsupported image type for {0:?}. Upload a JPG or PNG image.")]
    UnsupportedType(String),
}

/// An image received from a caller, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    filename: String,
    extension: String,
    bytes: Bytes,
}

impl UploadedImage {
    pub fn new(original_filename: &str, bytes: Bytes) -> Result<Self, IntakeError> {
        if bytes.is_empty() {
            return Err(IntakeError::EmptyUpload);
        }

        let filename = sanitize_filename(original_filename)
            .ok_or_else(|| IntakeError::InvalidFilename(original_filename.to_string()))?;

        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| IntakeError::UnsupportedType(original_filename.to_string()))?;

        Ok(Self {
            filename,
            extension,
            bytes,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.extension)
    }
}

pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Keeps the last path component and maps anything outside `[A-Za-z0-9._-]` to `_`.
/// Leading dots are dropped so the result can never be `.`, `..` or hidden.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
