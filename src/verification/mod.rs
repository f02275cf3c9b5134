//! Agent verification.
//!
//! An agent proves it controls a URL by publishing a server-issued code there:
//! 1. `start` issues `fa-verify-<hex>` for a handle and URL
//! 2. the agent puts the code somewhere in the page at that URL
//! 3. `check` fetches the page and looks for the code
//!
//! Codes expire after a configurable number of hours.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::artifacts::format_timestamp;

const CODE_PREFIX: &str = "fa-verify-";
const HANDLE_MAX_CHARS: usize = 64;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PAGE_BYTES: usize = 1024 * 1024;
const CLEANUP_PERIOD: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("agent_handle must be 1-64 characters of a-z, 0-9, '-' or '_'")]
    InvalidHandle,

    #[error("url must be an absolute http(s) URL on a public host")]
    InvalidUrl,

    #[error("no verification pending for {0}")]
    NotFound(String),

    #[error("verification code for {0} has expired")]
    Expired(String),

    #[error("verification code not found at {0}")]
    CodeMissing(String),

    #[error("could not fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub agent_handle: String,
    pub url: String,
    pub code: String,
    pub created_at: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<String>,
    #[serde(skip)]
    expires: DateTime<Utc>,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    /// Pending and past its expiry. Verified records never expire.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_verified() && now >= self.expires
    }
}

/// Retrieves page bodies for verification checks.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, String>;
}

/// `reqwest`-backed fetcher with a timeout and a body size cap.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = match Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("foragents-verifier/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(
                    "Failed to build verification HTTP client, falling back to defaults without a timeout: {}",
                    e
                );
                Client::new()
            }
        };
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        let mut resp = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| e.to_string())? {
            let room = MAX_PAGE_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_PAGE_BYTES {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Pending and completed verifications, keyed by handle.
pub struct VerificationStore {
    records: RwLock<HashMap<String, Verification>>,
    ttl: chrono::Duration,
}

impl VerificationStore {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::hours(ttl_hours.max(1)),
        }
    }

    /// Issue a fresh code, replacing any previous record for the handle.
    pub async fn start(&self, agent_handle: &str, url: &str) -> Result<Verification, VerificationError> {
        self.start_at(agent_handle, url, Utc::now()).await
    }

    async fn start_at(
        &self,
        agent_handle: &str,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<Verification, VerificationError> {
        let handle = normalize_handle(agent_handle)?;
        let url = validate_url(url)?;
        let expires = now + self.ttl;

        let verification = Verification {
            agent_handle: handle.clone(),
            url,
            code: new_code(),
            created_at: format_timestamp(now),
            expires_at: format_timestamp(expires),
            verified_at: None,
            expires,
        };

        self.records
            .write()
            .await
            .insert(handle.clone(), verification.clone());
        tracing::info!("Started verification for {} at {}", handle, verification.url);
        Ok(verification)
    }

    /// Current record for a handle. Expired pending records are hidden.
    pub async fn status(&self, agent_handle: &str) -> Option<Verification> {
        self.status_at(agent_handle, Utc::now()).await
    }

    async fn status_at(&self, agent_handle: &str, now: DateTime<Utc>) -> Option<Verification> {
        let handle = normalize_handle(agent_handle).ok()?;
        self.records
            .read()
            .await
            .get(&handle)
            .filter(|r| !r.is_expired_at(now))
            .cloned()
    }

    /// Drop pending records past their expiry. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now()).await
    }

    async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired_at(now));
        before - records.len()
    }

    pub async fn tracked_handles(&self) -> usize {
        self.records.read().await.len()
    }

    /// Fetch the agent's URL and look for its code.
    pub async fn check(
        &self,
        agent_handle: &str,
        fetcher: &dyn PageFetcher,
    ) -> Result<Verification, VerificationError> {
        self.check_at(agent_handle, fetcher, Utc::now()).await
    }

    async fn check_at(
        &self,
        agent_handle: &str,
        fetcher: &dyn PageFetcher,
        now: DateTime<Utc>,
    ) -> Result<Verification, VerificationError> {
        let handle = normalize_handle(agent_handle)?;
        let pending = self
            .records
            .read()
            .await
            .get(&handle)
            .cloned()
            .ok_or_else(|| VerificationError::NotFound(handle.clone()))?;

        if pending.is_verified() {
            return Ok(pending);
        }

        if pending.is_expired_at(now) {
            self.records.write().await.remove(&handle);
            tracing::info!("Verification for {} expired", handle);
            return Err(VerificationError::Expired(handle));
        }

        let page = fetcher
            .fetch(&pending.url)
            .await
            .map_err(|reason| VerificationError::FetchFailed {
                url: pending.url.clone(),
                reason,
            })?;

        if !page.contains(&pending.code) {
            tracing::debug!("Code for {} not present at {}", handle, pending.url);
            return Err(VerificationError::CodeMissing(pending.url));
        }

        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&handle).filter(|r| r.code == pending.code) else {
            // Restarted while we were fetching; the old code no longer counts.
            return Err(VerificationError::NotFound(handle));
        };
        record.verified_at = Some(format_timestamp(now));
        tracing::info!("Verified agent {} via {}", handle, record.url);
        Ok(record.clone())
    }
}

/// Periodically purge expired verifications for the life of the process.
pub fn spawn_cleanup(store: Arc<VerificationStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_PERIOD);
        loop {
            ticker.tick().await;
            let removed = store.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!("Dropped {} expired verifications", removed);
            }
        }
    });
}

fn normalize_handle(raw: &str) -> Result<String, VerificationError> {
    let handle = raw.trim().trim_start_matches('@').to_lowercase();
    let valid = !handle.is_empty()
        && handle.chars().count() <= HANDLE_MAX_CHARS
        && handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(handle)
    } else {
        Err(VerificationError::InvalidHandle)
    }
}

fn validate_url(raw: &str) -> Result<String, VerificationError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|_| VerificationError::InvalidUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(VerificationError::InvalidUrl);
    }
    let public = match parsed.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain != "localhost" && !domain.ends_with(".localhost")
        }
        Some(url::Host::Ipv4(ip)) => is_public_ip(IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => is_public_ip(IpAddr::V6(ip)),
        None => false,
    };
    if public {
        Ok(parsed.to_string())
    } else {
        Err(VerificationError::InvalidUrl)
    }
}

/// Rejects loopback, private, link-local and unspecified addresses.
fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // 100.64.0.0/10 carrier-grade NAT
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64))
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_public_ip(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

fn new_code() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", CODE_PREFIX, hex::encode(bytes))
}
