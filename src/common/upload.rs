use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

/// Form field the video must arrive in.
pub const VIDEO_FIELD: &str = "video";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No video uploaded")]
    MissingField,
    #[error("Empty filename")]
    EmptyFilename,
    #[error("Invalid content type {0}: only video/* allowed")]
    ContentType(String),
    #[error("Upload interrupted: {0}")]
    Interrupted(String),
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Whether the client sent something unusable, as opposed to a server fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Io(_))
    }
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub original_name: String,
    pub size_bytes: u64,
}

/// Writes an incoming body to disk chunk by chunk.
pub struct LocalUploader {
    path: PathBuf,
    file: File,
    written: u64,
}

impl LocalUploader {
    pub async fn new(path: PathBuf) -> Result<Self, UploadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), UploadError> {
        self.file.write_all(&chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<u64, UploadError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.written)
    }

    /// Removes whatever was written so a half file never gets processed.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.path).await {
            error!("Failed to remove partial upload {}: {}", self.path.display(), e);
        }
    }
}

fn is_video(content_type: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .map(|m| m.type_() == mime::VIDEO)
        .unwrap_or(false)
}

pub async fn stream_to_disk(mut field: Field<'_>, dest: &Path) -> Result<u64, UploadError> {
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    if !is_video(&content_type) {
        return Err(UploadError::ContentType(content_type));
    }

    let mut uploader = LocalUploader::new(dest.to_path_buf()).await?;

    while let Some(chunk) = field.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!("Stream error: {}", e);
                uploader.abort().await;
                return Err(UploadError::Interrupted(e.to_string()));
            }
        };

        if let Err(e) = uploader.write_chunk(chunk).await {
            error!("Write error: {}", e);
            uploader.abort().await;
            return Err(e);
        }
    }

    uploader.finish().await
}

/// Finds the `video` field and stores it at `dest`, whatever the client called it.
pub async fn save_video_field(multipart: &mut Multipart, dest: &Path) -> Result<StoredUpload, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Interrupted(e.to_string()))?
    {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let original_name = field.file_name().unwrap_or("").trim().to_string();
        if original_name.is_empty() {
            return Err(UploadError::EmptyFilename);
        }

        info!("Receiving upload {}", original_name);
        let size_bytes = stream_to_disk(field, dest).await?;
        info!("Stored {} bytes at {}", size_bytes, dest.display());

        return Ok(StoredUpload {
            path: dest.to_path_buf(),
            original_name,
            size_bytes,
        });
    }

    Err(UploadError::MissingField)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_video_types_pass() {
        assert!(is_video("video/mp4"));
        assert!(is_video("video/quicktime"));
        assert!(!is_video("image/png"));
        assert!(!is_video("application/octet-stream"));
        assert!(!is_video("not a mime"));
    }

    #[tokio::test]
    async fn test_abort_removes_partial_file() {
        let path = std::env::temp_dir().join(format!("upload-abort-{}.bin", uuid::Uuid::new_v4()));
        let mut uploader = LocalUploader::new(path.clone()).await.unwrap();
        uploader.write_chunk(Bytes::from_static(b"partial")).await.unwrap();
        uploader.abort().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_finish_reports_size() {
        let path = std::env::temp_dir().join(format!("upload-finish-{}.bin", uuid::Uuid::new_v4()));
        let mut uploader = LocalUploader::new(path.clone()).await.unwrap();
        uploader.write_chunk(Bytes::from_static(b"abc")).await.unwrap();
        uploader.write_chunk(Bytes::from_static(b"defg")).await.unwrap();
        assert_eq!(uploader.finish().await.unwrap(), 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefg");
        let _ = std::fs::remove_file(path);
    }
}
