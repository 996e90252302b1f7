use async_trait::async_trait;
use shared::evidence::{self, EvidenceKind, Upload};
use shared::MarketError;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

/// Blob storage for uploaded evidence. Callers validate uploads first.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Persists the blob and returns its reference, e.g.
    /// `pickup_proofs/<uuid>.png`.
    async fn put(&self, kind: EvidenceKind, upload: &Upload) -> Result<String, MarketError>;

    async fn remove(&self, reference: &str) -> Result<(), MarketError>;
}

/// Files under a media directory.
pub struct LocalEvidenceStore {
    root: PathBuf,
}

impl LocalEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn io_error(err: std::io::Error) -> MarketError {
    MarketError::Storage(format!("evidence store: {err}"))
}

#[async_trait]
impl EvidenceStore for LocalEvidenceStore {
    async fn put(&self, kind: EvidenceKind, upload: &Upload) -> Result<String, MarketError> {
        let extension = evidence::validate(kind, upload)?;
        let reference = format!("{}/{}.{}", kind.directory(), Uuid::new_v4(), extension);

        let path = self.root.join(&reference);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(io_error)?;

        info!("Stored {} bytes of evidence at {}", upload.bytes.len(), reference);
        Ok(reference)
    }

    async fn remove(&self, reference: &str) -> Result<(), MarketError> {
        if reference.split('/').any(|part| part == "..") {
            return Err(MarketError::NotFound);
        }
        match tokio::fs::remove_file(self.root.join(reference)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(err)),
        }
    }
}
