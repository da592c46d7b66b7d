//! HTTP client for the gateway admin surface.

use anyhow::{bail, Context, Result};
use edge_cache::{CacheStats, EntryPreview, WarmReport};
use edge_gateway::{DeleteResponse, InvalidateRequest, InvalidateResponse, WarmRequest};
use serde::de::DeserializeOwned;
use url::Url;

/// Talks to `{gateway}{prefix}/...`.
pub struct AdminClient {
    http: reqwest::Client,
    base: Url,
}

impl AdminClient {
    pub fn new(gateway: &str, prefix: &str) -> Result<Self> {
        let base = Url::parse(gateway)
            .and_then(|url| url.join(&format!("{}/", prefix.trim_end_matches('/'))))
            .with_context(|| format!("Invalid gateway URL: {}", gateway))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    fn url(&self, op: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base
            .join(op)
            .with_context(|| format!("Invalid admin path: {}", op))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Gateway returned {}: {}", status, body);
        }
        response
            .json::<T>()
            .await
            .context("Failed to decode gateway response")
    }

    pub async fn invalidate(&self, pattern: &str) -> Result<InvalidateResponse> {
        let body = InvalidateRequest {
            pattern: pattern.to_string(),
        };
        let response = self
            .http
            .post(self.url("invalidate", &[])?)
            .json(&body)
            .send()
            .await
            .context("Failed to reach gateway")?;
        Self::read(response).await
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let response = self
            .http
            .get(self.url("stats", &[])?)
            .send()
            .await
            .context("Failed to reach gateway")?;
        Self::read(response).await
    }

    pub async fn preview_path(
        &self,
        path: &str,
        version: Option<u32>,
        content: bool,
    ) -> Result<Vec<EntryPreview>> {
        let version = version.map(|v| v.to_string());
        let mut query = vec![("path", path)];
        if let Some(version) = version.as_deref() {
            query.push(("version", version));
        }
        if content {
            query.push(("content", "1"));
        }
        let response = self
            .http
            .get(self.url("preview", &query)?)
            .send()
            .await
            .context("Failed to reach gateway")?;
        Self::read(response).await
    }

    pub async fn preview_key(&self, key: &str, content: bool) -> Result<EntryPreview> {
        let mut query = vec![("key", key)];
        if content {
            query.push(("content", "1"));
        }
        let response = self
            .http
            .get(self.url("preview", &query)?)
            .send()
            .await
            .context("Failed to reach gateway")?;
        Self::read(response).await
    }

    pub async fn warm(&self, paths: Vec<String>, version: Option<u32>) -> Result<WarmReport> {
        let response = self
            .http
            .post(self.url("warm", &[])?)
            .json(&WarmRequest { paths, version })
            .send()
            .await
            .context("Failed to reach gateway")?;
        Self::read(response).await
    }

    pub async fn delete(&self, key: &str) -> Result<DeleteResponse> {
        let response = self
            .http
            .delete(self.url("entry", &[("key", key)])?)
            .send()
            .await
            .context("Failed to reach gateway")?;
        Self::read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_urls() {
        let client = AdminClient::new("http://localhost:3000", "/__cache").unwrap();
        assert_eq!(
            client.url("stats", &[]).unwrap().as_str(),
            "http://localhost:3000/__cache/stats"
        );
        let url = client
            .url("entry", &[("key", "cache:v1:/a b:ff")])
            .unwrap();
        assert_eq!(url.path(), "/__cache/entry");
        assert_eq!(
            url.query_pairs().next().unwrap().1,
            "cache:v1:/a b:ff"
        );
    }
}
