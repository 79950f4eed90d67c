//! Error types for the shuto API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Startup errors
#[derive(Debug)]
pub enum ShutoError {
    Config(String),
    Cache(swr_cache::CacheError),
    Io(Box<std::io::Error>),
}

impl fmt::Display for ShutoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutoError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ShutoError::Cache(err) => write!(f, "Cache error: {}", err),
            ShutoError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ShutoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShutoError::Cache(err) => Some(err),
            ShutoError::Io(err) => Some(err.as_ref()),
            ShutoError::Config(_) => None,
        }
    }
}

impl From<swr_cache::CacheError> for ShutoError {
    fn from(err: swr_cache::CacheError) -> Self {
        ShutoError::Cache(err)
    }
}

impl From<std::io::Error> for ShutoError {
    fn from(err: std::io::Error) -> Self {
        ShutoError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ShutoError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ShutoError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShutoError>;

/// Errors from listing or fetching remote files
#[derive(Debug)]
pub enum StorageError {
    /// No remote is configured for the request's domain
    UnknownDomain(String),
    InvalidPath(String),
    /// rclone exited unsuccessfully
    Command { status: Option<i32>, stderr: String },
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDomain(domain) => write!(f, "No remote configured for domain {}", domain),
            Self::InvalidPath(path) => write!(f, "Invalid path: {}", path),
            Self::Command { status, stderr } => match status {
                Some(code) => write!(f, "rclone exited with status {}: {}", code, stderr.trim()),
                None => write!(f, "rclone terminated by signal: {}", stderr.trim()),
            },
            Self::Io(err) => write!(f, "Failed to run rclone: {}", err),
            Self::Parse(err) => write!(f, "Failed to parse rclone output: {}", err),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err)
    }
}

/// Errors from decoding, transforming or encoding images
#[derive(Debug)]
pub enum ImagingError {
    /// Rejected transform parameters
    InvalidOptions(String),
    Image(image::ImageError),
}

impl fmt::Display for ImagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOptions(msg) => write!(f, "Invalid transform options: {}", msg),
            Self::Image(err) => write!(f, "Image error: {}", err),
        }
    }
}

impl std::error::Error for ImagingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::InvalidOptions(_) => None,
        }
    }
}

impl From<image::ImageError> for ImagingError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err)
    }
}

/// Handler error type that converts to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnknownDomain(_) => ApiError::NotFound(err.to_string()),
            StorageError::InvalidPath(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ImagingError> for ApiError {
    fn from(err: ImagingError) -> Self {
        match err {
            ImagingError::InvalidOptions(_) => ApiError::BadRequest(err.to_string()),
            ImagingError::Image(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<swr_cache::CacheError> for ApiError {
    fn from(err: swr_cache::CacheError) -> Self {
        // Fetch errors keep the status of the storage error underneath
        if let swr_cache::CacheError::Fetch(fetch) = &err {
            if let Some(storage) = fetch.downcast_ref::<StorageError>() {
                return match storage {
                    StorageError::UnknownDomain(_) => ApiError::NotFound(err.to_string()),
                    StorageError::InvalidPath(_) => ApiError::BadRequest(err.to_string()),
                    _ => ApiError::Internal(err.to_string()),
                };
            }
        }
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ShutoError::Config("DIMENSIONS_CACHE_SIZE must be positive".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: DIMENSIONS_CACHE_SIZE must be positive"
        );
    }

    #[test]
    fn test_server_io_error_is_io() {
        let err: ShutoError =
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use").into();
        assert!(matches!(err, ShutoError::Io(_)));
        assert_eq!(format!("{}", err), "IO error: address in use");

        let source = std::error::Error::source(&err).unwrap();
        let io = source.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_command_error_display() {
        let err = StorageError::Command {
            status: Some(3),
            stderr: "directory not found\n".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "rclone exited with status 3: directory not found"
        );
    }

    #[test]
    fn test_storage_error_status_mapping() {
        let response = ApiError::from(StorageError::UnknownDomain("a.test".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::from(StorageError::InvalidPath("../x".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(StorageError::Command {
            status: Some(1),
            stderr: String::new(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_cache_fetch_error_keeps_storage_status() {
        let err = swr_cache::CacheError::Fetch(swr_cache::FetchError::new(
            StorageError::InvalidPath("../etc".into()),
        ));
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_options_is_bad_request() {
        let err = ApiError::from(ImagingError::InvalidOptions("unknown fit".into()));
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_error_is_debug() {
        let err = ShutoError::Config("test".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Config"));
    }
}
