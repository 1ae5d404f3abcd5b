use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{AppError, Result};

/// Containers accepted for uploaded videos.
pub const UPLOAD_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

/// Lower-cased extension of `name` if it is an accepted upload container.
pub fn upload_extension(name: &str) -> Option<String> {
    let ext = Path::new(name)
        .extension()?
        .to_string_lossy()
        .to_lowercase();
    UPLOAD_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Accepts a bare index (`"0"`) or a V4L2 node (`"/dev/video2"`).
pub fn parse_device_index(uri: &str) -> Option<u32> {
    if let Ok(index) = uri.parse::<u32>() {
        return Some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
        return stripped.parse::<u32>().ok();
    }
    None
}

/// Persist `bytes` to a temporary file that is deleted when dropped.
pub fn scoped_temp_file(prefix: &str, suffix: &str, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .map_err(|e| AppError::SourceResolution(format!("cannot create temp file: {e}")))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| AppError::SourceResolution(format!("cannot write temp file: {e}")))?;
    Ok(file)
}
