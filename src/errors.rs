use std::path::PathBuf;
use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for supercollager.
///
/// Each variant carries the context of its domain (filesystem, image processing,
/// models, video subprocesses, network fetches) so callers never parse strings.
#[derive(Error, Debug)]
pub enum CollagerError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Fetch error: could not download {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Video error: {operation} failed for {path:?}: {message}")]
    Video {
        path: PathBuf,
        operation: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, CollagerError>;

impl CollagerError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn video(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::Video {
            path: path.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Fallback for I/O errors raised without path context. Call sites that know the
/// path construct `CollagerError::FileSystem` themselves.
impl From<std::io::Error> for CollagerError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for CollagerError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for CollagerError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only come out of tensor handling around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for CollagerError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = CollagerError::validation("inputs", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Validation error: inputs must not be empty"
        );
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CollagerError::from(io);
        assert!(matches!(err, CollagerError::FileSystem { .. }));
        assert_eq!(err.source().map(|s| s.to_string()), Some("gone".to_string()));
    }
}
