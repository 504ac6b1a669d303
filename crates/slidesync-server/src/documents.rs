//! Document storage: receives uploaded decks and serves them back by name.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "pdf";

/// Upload and retrieval failures. The display text is the response body.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Body or file exceeds the upload limit.
    #[error("File too large")]
    TooLarge,
    /// No usable `pdf` file field in the form.
    #[error("Error retrieving file")]
    MissingFile,
    /// File name does not end in `.pdf`.
    #[error("Invalid file type. Only PDFs allowed")]
    InvalidType,
    /// Requested name could escape the store.
    #[error("Invalid file name")]
    InvalidName,
    /// No document with that name.
    #[error("File not found")]
    NotFound,
    /// The store failed.
    #[error("Error saving file")]
    Storage(#[source] io::Error),
}

impl DocumentError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLarge | Self::MissingFile | Self::InvalidType | Self::InvalidName => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TooLarge => "too_large",
            Self::MissingFile => "missing_file",
            Self::InvalidType => "invalid_type",
            Self::InvalidName => "invalid_name",
            Self::NotFound => "not_found",
            Self::Storage(_) => "storage",
        }
    }

    fn from_multipart(err: &MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::TooLarge
        } else {
            debug!(error = %err, "unreadable multipart body");
            Self::MissingFile
        }
    }
}

impl IntoResponse for DocumentError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Content store for uploaded documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `data` under `name`, replacing any previous document.
    async fn put(&self, name: &str, data: Bytes) -> io::Result<()>;

    /// Fetch a document; `Ok(None)` if there is none by that name.
    async fn get(&self, name: &str) -> io::Result<Option<Bytes>>;
}

/// Stores documents as files in one directory.
#[derive(Clone, Debug)]
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    /// Store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the documents.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, name: &str, data: Bytes) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        // Write aside and rename so readers never see a partial file. The
        // suffix keeps concurrent writers of one name apart.
        let partial = self.root.join(format!(".{name}.{}.part", Uuid::now_v7()));
        let result = async {
            tokio::fs::write(&partial, &data).await?;
            tokio::fs::rename(&partial, self.root.join(name)).await
        }
        .await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                debug!(path = %partial.display(), error = %e, "no partial file to remove");
            }
        }
        result
    }

    async fn get(&self, name: &str) -> io::Result<Option<Bytes>> {
        match tokio::fs::read(self.root.join(name)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A file pulled out of an upload form.
#[derive(Debug)]
pub struct Upload {
    /// Client-supplied file name.
    pub file_name: String,
    /// File contents.
    pub data: Bytes,
}

/// Read the [`UPLOAD_FIELD`] file from `multipart`, refusing anything over
/// `max_bytes`.
pub async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Upload, DocumentError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| DocumentError::from_multipart(&e))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            return Err(DocumentError::MissingFile);
        };

        let mut data = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| DocumentError::from_multipart(&e))?
        {
            data.extend_from_slice(&chunk);
            if data.len() > max_bytes {
                return Err(DocumentError::TooLarge);
            }
        }
        return Ok(Upload {
            file_name,
            data: data.freeze(),
        });
    }
    Err(DocumentError::MissingFile)
}

/// Final path component of a client-supplied file name, whichever
/// separator the client used.
pub fn base_name(original: &str) -> &str {
    original.rsplit(['/', '\\']).next().unwrap_or(original)
}

/// Whether `name` ends in `.pdf`, ignoring case.
pub fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Reject names that are empty or could address anything outside the store.
pub fn validate_name(name: &str) -> Result<(), DocumentError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
    {
        warn!(name, "rejected document name");
        return Err(DocumentError::InvalidName);
    }
    Ok(())
}

/// Name a stored upload: `{unix_secs}_{base name}`.
pub fn stored_name(original: &str, unix_secs: i64) -> Result<String, DocumentError> {
    let base = base_name(original);
    if !has_pdf_extension(base) {
        return Err(DocumentError::InvalidType);
    }
    let name = format!("{unix_secs}_{base}");
    validate_name(&name)?;
    Ok(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
