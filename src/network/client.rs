use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::NetworkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Authenticated call against the habit API. Succeeds iff the server
/// acknowledged the request with a 2xx status.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<(), NetworkError>;
}

pub struct HttpApiClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl HttpApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
            http,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<(), NetworkError> {
        let url = self.url(path);
        let mut request = self.http.request(method.into(), &url);

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NetworkError::StatusError {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("{} {} -> {}", method, url, status);
        Ok(())
    }
}
