//! Upload checks applied before any decoding.

use thiserror::Error;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug, PartialEq)]
pub enum UploadError {
    #[error("Invalid file format. Only JPG, JPEG, PNG, and WEBP formats are allowed.")]
    InvalidFormat,
    #[error("File size exceeds maximum limit of {limit_mib:.0} MB. Current size: {size_mib:.2} MB")]
    TooLarge { limit_mib: f64, size_mib: f64 },
}

/// Check one uploaded file's extension (case-insensitive) and size.
pub fn validate_upload(filename: &str, size: usize, max_bytes: usize) -> Result<(), UploadError> {
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => return Err(UploadError::InvalidFormat),
    }

    if size > max_bytes {
        return Err(UploadError::TooLarge {
            limit_mib: max_bytes as f64 / MIB,
            size_mib: size as f64 / MIB,
        });
    }
    Ok(())
}
