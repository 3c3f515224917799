//! Scratch storage for uploaded files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::errors::{MriSegError, Result};

/// An uploaded file written under a unique name in the scratch directory.
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct Upload {
    file: NamedTempFile,
}

impl Upload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Writes `bytes` to a fresh file in `dir`. Only the extension of the client's
/// file name is kept, so readers that look at it still can.
pub fn persist_upload(dir: &Path, file_name: Option<&str>, bytes: &[u8]) -> Result<Upload> {
    if bytes.is_empty() {
        return Err(MriSegError::Upload {
            reason: "uploaded file is empty".to_string(),
        });
    }

    fs::create_dir_all(dir).map_err(|e| fs_error(dir.to_path_buf(), "create upload directory", e))?;

    let suffix = scratch_suffix(file_name);
    let mut file = Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|e| fs_error(dir.to_path_buf(), "create scratch file", e))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| fs_error(file.path().to_path_buf(), "write upload", e))?;

    debug!(path = %file.path().display(), bytes = bytes.len(), "stored upload");
    Ok(Upload { file })
}

/// `.nii.gz` is kept whole; otherwise a short alphanumeric extension or nothing.
pub fn scratch_suffix(file_name: Option<&str>) -> String {
    let Some(name) = file_name else {
        return String::new();
    };
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".nii.gz") {
        return ".nii.gz".to_string();
    }

    Path::new(&lower)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

fn fs_error(path: PathBuf, operation: &str, source: std::io::Error) -> MriSegError {
    MriSegError::FileSystem {
        path,
        operation: operation.to_string(),
        source,
    }
}
