use crate::error::{Result, ShutoError};
use crate::types::{ApiConfig, CachePolicy};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Path prefix for all versioned routes
pub const API_VERSION: &str = "v2";

impl ApiConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ApiConfig::default();

        let parse_or = |name: &str, default: u64| -> u64 {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let port = lookup("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let log_level = lookup("LOG_LEVEL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.log_level);

        let rclone_bin = lookup("RCLONE_BIN").unwrap_or(defaults.rclone_bin);

        let default_remote = lookup("RCLONE_REMOTE").filter(|s| !s.trim().is_empty());

        let domain_remotes = lookup("DOMAIN_REMOTES")
            .map(|s| parse_domain_remotes(&s))
            .transpose()?
            .unwrap_or_default();

        let dimensions_cache = CachePolicy {
            max_size: parse_or(
                "DIMENSIONS_CACHE_SIZE",
                defaults.dimensions_cache.max_size as u64,
            ) as usize,
            ttl: Duration::from_secs(parse_or(
                "DIMENSIONS_TTL_SECS",
                defaults.dimensions_cache.ttl.as_secs(),
            )),
            stale_time: Duration::from_secs(parse_or(
                "DIMENSIONS_STALE_SECS",
                defaults.dimensions_cache.stale_time.as_secs(),
            )),
        };

        let listing_cache = CachePolicy {
            max_size: parse_or("LISTING_CACHE_SIZE", defaults.listing_cache.max_size as u64)
                as usize,
            ttl: Duration::from_secs(parse_or(
                "LISTING_TTL_SECS",
                defaults.listing_cache.ttl.as_secs(),
            )),
            stale_time: Duration::from_secs(parse_or(
                "LISTING_STALE_SECS",
                defaults.listing_cache.stale_time.as_secs(),
            )),
        };

        Ok(Self {
            port,
            log_level,
            rclone_bin,
            default_remote,
            domain_remotes,
            dimensions_cache,
            listing_cache,
        })
    }
}

/// Parse `host=remote` pairs separated by commas
fn parse_domain_remotes(raw: &str) -> Result<HashMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (domain, remote) = pair.split_once('=').ok_or_else(|| {
                ShutoError::Config(format!("DOMAIN_REMOTES entry {:?} is not host=remote", pair))
            })?;
            let (domain, remote) = (domain.trim(), remote.trim());
            if domain.is_empty() || remote.is_empty() {
                return Err(ShutoError::Config(format!(
                    "DOMAIN_REMOTES entry {:?} has an empty host or remote",
                    pair
                )));
            }
            Ok((domain.to_ascii_lowercase(), remote.to_string()))
        })
        .collect()
}
