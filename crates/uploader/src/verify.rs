//! End-to-end integrity check against the store's digest.

use std::path::Path;

use chunkvault_transfer::{TransferError, calculate_file_checksum};
use tracing::{info, warn};

use crate::error::UploadError;

/// Result of comparing the local digest with the store's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityReport {
    Match { digest: String },
    Mismatch { local: String, remote: String },
}

impl IntegrityReport {
    pub fn is_match(&self) -> bool {
        matches!(self, IntegrityReport::Match { .. })
    }

    /// The mismatch as an error value, for callers that treat it as fatal.
    pub fn into_error(self) -> Option<TransferError> {
        match self {
            IntegrityReport::Match { .. } => None,
            IntegrityReport::Mismatch { local, remote } => {
                Some(TransferError::IntegrityMismatch { local, remote })
            }
        }
    }
}

/// Re-reads the local source and compares its SHA-256 with the store's.
///
/// A mismatch is reported, not raised: the artifact is already published
/// and the operator decides what to do.
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub async fn verify(source: &Path, remote: &str) -> Result<IntegrityReport, UploadError> {
        let path = source.to_path_buf();
        let local = tokio::task::spawn_blocking(move || calculate_file_checksum(&path)).await??;

        if local.eq_ignore_ascii_case(remote) {
            info!(digest = %local, "integrity verified");
            Ok(IntegrityReport::Match { digest: local })
        } else {
            warn!(%local, %remote, "integrity mismatch between source and store");
            Ok(IntegrityReport::Mismatch {
                local,
                remote: remote.to_string(),
            })
        }
    }
}
