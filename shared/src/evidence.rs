//! Upload checks for evidence blobs.
//!
//! The blob store itself lives outside the core; this module decides what it
//! may be handed.

use serde::Serialize;

use crate::error::MarketError;

/// 5MB ceiling for every upload.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    PickupProof,
    OwnerPhoto,
    BusinessPermit,
    DtiCertificate,
    MayorsPermit,
    ValidId,
}

impl EvidenceKind {
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::PickupProof | Self::OwnerPhoto => IMAGE_EXTENSIONS,
            _ => DOCUMENT_EXTENSIONS,
        }
    }

    /// Directory, relative to the blob root, that holds this kind.
    pub fn directory(&self) -> &'static str {
        match self {
            Self::PickupProof => "pickup_proofs",
            Self::OwnerPhoto => "store_owners",
            Self::BusinessPermit => "seller_documents/permits",
            Self::DtiCertificate => "seller_documents/dti",
            Self::MayorsPermit => "seller_documents/mayors",
            Self::ValidId => "seller_documents/ids",
        }
    }

    /// Form field the upload arrives in.
    pub fn field(&self) -> &'static str {
        match self {
            Self::PickupProof => "pickup_proof",
            Self::OwnerPhoto => "owner_photo",
            Self::BusinessPermit => "business_permit",
            Self::DtiCertificate => "dti_certificate",
            Self::MayorsPermit => "mayors_permit",
            Self::ValidId => "valid_id",
        }
    }

    fn rejected_format(&self) -> &'static str {
        match self {
            Self::PickupProof | Self::OwnerPhoto => "Only JPG, JPEG, and PNG files are allowed.",
            _ => "Only PDF, JPG, JPEG, and PNG files are allowed.",
        }
    }
}

/// An uploaded file as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Check format and size, returning the normalized extension.
pub fn validate(kind: EvidenceKind, upload: &Upload) -> Result<String, MarketError> {
    let extension = upload
        .extension()
        .filter(|ext| kind.allowed_extensions().contains(&ext.as_str()))
        .ok_or_else(|| MarketError::validation(kind.rejected_format()))?;

    if upload.bytes.is_empty() {
        return Err(MarketError::validation("Uploaded file is empty."));
    }
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(MarketError::validation("File size must be less than 5MB."));
    }
    Ok(extension)
}
