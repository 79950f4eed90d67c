//! Core types for the shuto API

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use swr_cache::CacheStats;

/// A file or directory as reported by `rclone lsjson`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteFile {
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub is_dir: bool,
}

impl RemoteFile {
    pub fn is_image(&self) -> bool {
        !self.is_dir && self.mime_type.starts_with("image/")
    }
}

/// Width and height of an image in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Entry in a list response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub path: String,
    pub size: i64,
    pub mime_type: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl From<&RemoteFile> for FileResponse {
    fn from(file: &RemoteFile) -> Self {
        Self {
            path: file.path.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            is_dir: file.is_dir,
            width: None,
            height: None,
        }
    }
}

/// Freshness settings for one of the service caches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_size: usize,
    pub ttl: Duration,
    pub stale_time: Duration,
}

/// Configuration for the service
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub log_level: String,
    pub rclone_bin: String,
    pub default_remote: Option<String>,
    /// Host name to rclone remote, e.g. `images.example.com` -> `s3:example-images`
    pub domain_remotes: HashMap<String, String>,
    pub dimensions_cache: CachePolicy,
    pub listing_cache: CachePolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            rclone_bin: "rclone".to_string(),
            default_remote: None,
            domain_remotes: HashMap::new(),
            dimensions_cache: CachePolicy {
                max_size: 1000,
                ttl: Duration::from_secs(24 * 60 * 60),
                stale_time: Duration::from_secs(60 * 60),
            },
            listing_cache: CachePolicy {
                max_size: 256,
                ttl: Duration::from_secs(60),
                stale_time: Duration::from_secs(10),
            },
        }
    }
}

/// Cache statistics reported by the health endpoint
#[derive(Debug, Serialize)]
pub struct CachesHealth {
    pub dimensions: CacheStats,
    pub listings: CacheStats,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub caches: CachesHealth,
}
