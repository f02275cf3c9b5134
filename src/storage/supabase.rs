//! Supabase (PostgREST) backend for artifacts.

use async_trait::async_trait;
use reqwest::Client;

use super::{ArtifactBackend, StoreError};
use crate::artifacts::{format_timestamp, Artifact, ListQuery};

const TABLE: &str = "artifacts";

/// Artifact rows in a Supabase `artifacts` table.
pub struct SupabaseBackend {
    client: Client,
    url: String,
    service_role_key: String,
}

impl SupabaseBackend {
    pub fn new(url: &str, service_role_key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    /// Get the PostgREST URL.
    pub(crate) fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    async fn fetch_rows(&self, query: &str) -> Result<Vec<Artifact>, StoreError> {
        let resp = self
            .authed(
                self.client
                    .get(format!("{}/{}?{}", self.rest_url(), TABLE, query)),
            )
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ArtifactBackend for SupabaseBackend {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Artifact>, StoreError> {
        self.fetch_rows(&list_query_string(query)).await
    }

    async fn get(&self, id: &str) -> Result<Option<Artifact>, StoreError> {
        let query = format!("select=*&id=eq.{}&limit=1", url_component(id));
        Ok(self.fetch_rows(&query).await?.into_iter().next())
    }

    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let resp = self
            .authed(self.client.post(format!("{}/{}", self.rest_url(), TABLE)))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(artifact)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("Failed to insert artifact {}: {} - {}", artifact.id, status, body);
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// PostgREST query for one page: bounded by `before` and `limit` server-side.
fn list_query_string(query: &ListQuery) -> String {
    let mut params = format!(
        "select=*&order=created_at.desc,id.desc&limit={}",
        query.effective_limit()
    );
    if let Some(before) = query.before {
        params.push_str("&created_at=lt.");
        params.push_str(&url_component(&format_timestamp(before)));
    }
    params
}

/// Percent-encode a value for a PostgREST filter.
fn url_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_url_trims_trailing_slash() {
        let backend = SupabaseBackend::new("https://abc.supabase.co/", "key");
        assert_eq!(backend.rest_url(), "https://abc.supabase.co/rest/v1");
    }

    #[test]
    fn test_list_query_is_bounded() {
        let first = list_query_string(&ListQuery::default());
        assert_eq!(first, "select=*&order=created_at.desc,id.desc&limit=20");

        let before = chrono::DateTime::parse_from_rfc3339("2026-03-01T12:00:00.250Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let page = list_query_string(&ListQuery {
            limit: Some(500),
            before: Some(before),
        });
        assert_eq!(
            page,
            "select=*&order=created_at.desc,id.desc&limit=100&created_at=lt.2026-03-01T12%3A00%3A00.250Z"
        );
    }

    #[test]
    fn test_filter_values_are_encoded() {
        assert_eq!(url_component("art_1&x=y"), "art_1%26x%3Dy");
    }
}
