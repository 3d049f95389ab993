use std::path::{Component, Path};

use crate::TransferError;

/// Suffix of the directory holding per-chunk records of an artifact.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Suffix of the in-progress destination of a stream upload.
pub const STREAM_SUFFIX: &str = ".stream";

/// Longest accepted artifact name, in bytes.
///
/// Leaves room for the longest derived name, `X.partial`, within the
/// 255-byte file name limit of common filesystems.
pub const MAX_NAME_LEN: usize = 255 - PARTIAL_SUFFIX.len();

/// Validates an artifact name before it is used as a storage key.
///
/// Rejects:
/// - Empty or overlong names
/// - Anything that is not exactly one normal path component
///   (separators, `..`, absolute paths, Windows prefixes)
/// - Hidden names (leading `.`, reserved for merge temp files)
/// - Names ending in the reserved partial-state suffixes
pub fn validate_artifact_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "name longer than {MAX_NAME_LEN} bytes"
        )));
    }

    if name.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => {
            return Err(TransferError::InvalidName(format!(
                "not a plain file name: {name}"
            )));
        }
    }

    if name.starts_with('.') {
        return Err(TransferError::InvalidName(format!(
            "hidden names not allowed: {name}"
        )));
    }

    if name.ends_with(PARTIAL_SUFFIX) || name.ends_with(STREAM_SUFFIX) {
        return Err(TransferError::InvalidName(format!(
            "reserved suffix: {name}"
        )));
    }

    Ok(())
}
