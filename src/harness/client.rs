//! HTTP access to the service under test

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::common::config::ServiceEndpoint;
use crate::common::{Error, Result};

/// A response reduced to what scenarios assert on
#[derive(Debug, Clone)]
pub struct Reply {
    /// `METHOD /path`, for messages
    pub request: String,
    pub status: u16,
    pub body: String,
}

impl Reply {
    /// Parse the body as JSON. An unparsable body counts as a transport
    /// failure: the service answered, but not with the contract's shape.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            Error::malformed(
                &self.request,
                format!("expected JSON body ({}), got '{}'", e, truncate(&self.body)),
            )
        })
    }
}

/// Client bound to one service endpoint
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(endpoint: &ServiceEndpoint, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: endpoint.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET path`
    pub async fn get(&self, path: &str) -> Result<Reply> {
        let request = format!("GET {}", path);
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::transport(&request, e))?;
        Self::read(request, response).await
    }

    /// `POST path` with a JSON body
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Reply> {
        let request = format!("POST {}", path);
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::transport(&request, e))?;
        Self::read(request, response).await
    }

    /// `POST path` without a body
    pub async fn post_empty(&self, path: &str) -> Result<Reply> {
        let request = format!("POST {}", path);
        let response = self
            .http
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| Error::transport(&request, e))?;
        Self::read(request, response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read(request: String, response: reqwest::Response) -> Result<Reply> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(&request, e))?;

        tracing::debug!(%request, status, body_len = body.len(), "HTTP exchange");

        Ok(Reply {
            request,
            status,
            body,
        })
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.chars().count() > LIMIT {
        format!("{}...", body.chars().take(LIMIT).collect::<String>())
    } else {
        body.to_string()
    }
}
