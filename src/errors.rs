use std::path::PathBuf;
use thiserror::Error;

/// Boxed source error that can cross `spawn_blocking` boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the MRI inference service.
///
/// Every variant's `Display` names the failing operation without echoing the
/// source chain. Handlers return that top-level text to clients and log the
/// chain separately, so file contents and runtime internals stay server-side.
#[derive(Error, Debug)]
pub enum MriSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Volume loading error: {operation} failed (file: {path})")]
    VolumeLoading {
        path: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Preprocessing error: {operation}: {reason}")]
    Preprocessing { operation: String, reason: String },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Rendering error: {operation} failed")]
    Rendering {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Upload error: {reason}")]
    Upload { reason: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MriSegError>;

impl MriSegError {
    pub(crate) fn model<E: std::fmt::Display>(operation: impl Into<String>, err: E) -> Self {
        Self::Model {
            operation: operation.into(),
            source: err.to_string().into(),
        }
    }

    pub(crate) fn preprocessing(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Preprocessing {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Full `source()` chain joined with `: `, for logs.
    pub fn chain_message(&self) -> String {
        let mut message = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            message.push_str(": ");
            message.push_str(&err.to_string());
            current = err.source();
        }
        message
    }
}

/// Startup code reports failures through anyhow; convert them at the library boundary.
impl From<anyhow::Error> for MriSegError {
    fn from(err: anyhow::Error) -> Self {
        MriSegError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Fallback for I/O errors raised without path context.
///
/// Callers that know the path should build `MriSegError::FileSystem` directly.
impl From<std::io::Error> for MriSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to rendering errors.
impl From<image::ImageError> for MriSegError {
    fn from(err: image::ImageError) -> Self {
        Self::Rendering {
            operation: "png encoding".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for MriSegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for MriSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
