//! Service configuration.
//!
//! Everything is read from environment variables once at startup:
//!
//! - `HOST` / `PORT` - bind address (default `127.0.0.1:3000`)
//! - `FORAGENTS_DATA_DIR` - directory holding the JSON stores (default `./data`,
//!   `none` disables the file backend)
//! - `SUPABASE_URL` / `SUPABASE_SERVICE_ROLE_KEY` - relational backend
//! - `MAX_BODY_BYTES` - request body limit for write routes
//! - `RATE_LIMIT_MAX` / `RATE_LIMIT_WINDOW_SECS` - write route rate limit
//! - `VERIFICATION_TTL_HOURS` - lifetime of an agent verification code
//! - `FEED_RELOAD_SECS` - how often `feed.json` is re-read

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Supabase project credentials.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Directory for `artifacts.json`, `feed.json` and `viral-events.jsonl`.
    pub data_dir: Option<PathBuf>,
    /// Present only when both URL and key are set.
    pub supabase: Option<SupabaseConfig>,
    pub max_body_bytes: usize,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub verification_ttl_hours: i64,
    pub feed_reload_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            data_dir: Some(PathBuf::from("./data")),
            supabase: None,
            max_body_bytes: 64 * 1024,
            rate_limit_max: 20,
            rate_limit_window_secs: 60,
            verification_ttl_hours: 24,
            feed_reload_secs: 300,
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            _ => None,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_number("PORT", get("PORT"), defaults.port)?,
            data_dir: match get("FORAGENTS_DATA_DIR") {
                Some(dir) if dir.trim().eq_ignore_ascii_case("none") => None,
                Some(dir) => Some(PathBuf::from(dir)),
                None => defaults.data_dir,
            },
            supabase,
            max_body_bytes: parse_number(
                "MAX_BODY_BYTES",
                get("MAX_BODY_BYTES"),
                defaults.max_body_bytes,
            )?,
            rate_limit_max: parse_number(
                "RATE_LIMIT_MAX",
                get("RATE_LIMIT_MAX"),
                defaults.rate_limit_max,
            )?,
            rate_limit_window_secs: parse_number(
                "RATE_LIMIT_WINDOW_SECS",
                get("RATE_LIMIT_WINDOW_SECS"),
                defaults.rate_limit_window_secs,
            )?,
            verification_ttl_hours: parse_number(
                "VERIFICATION_TTL_HOURS",
                get("VERIFICATION_TTL_HOURS"),
                defaults.verification_ttl_hours,
            )?,
            feed_reload_secs: parse_number(
                "FEED_RELOAD_SECS",
                get("FEED_RELOAD_SECS"),
                defaults.feed_reload_secs,
            )?,
        })
    }

    /// Config for tests: everything local, rooted at `data_dir`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }
}

fn parse_number<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_body_bytes, 64 * 1024);
        assert!(config.supabase.is_none());
        assert_eq!(config.data_dir, Some(PathBuf::from("./data")));
    }

    #[test]
    fn test_supabase_requires_both_values() {
        let only_url = Config::from_lookup(lookup(&[("SUPABASE_URL", "https://x.supabase.co")]))
            .unwrap();
        assert!(only_url.supabase.is_none());

        let both = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
        ]))
        .unwrap();
        assert_eq!(both.supabase.unwrap().service_role_key, "secret");
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = Config::from_lookup(lookup(&[("PORT", "abc")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        assert!(Config::from_lookup(lookup(&[("RATE_LIMIT_MAX", "0")])).is_err());
    }

    #[test]
    fn test_data_dir_can_be_disabled() {
        let config = Config::from_lookup(lookup(&[("FORAGENTS_DATA_DIR", "none")])).unwrap();
        assert!(config.data_dir.is_none());
    }
}
