// One-shot HTTP client
//
// Wraps `reqwest::Client` with base-URL joining, bearer attachment, the
// refresh-then-retry-once rule on 401, and JSON body decoding. Both
// adapters route their request/response calls through this type.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::auth::CredentialStore;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Request/response client for terminal and relay REST endpoints.
///
/// Every call carries the store's current bearer credential. A 401 triggers
/// exactly one `refresh()` and one retry; a second 401 (or a failed
/// refresh) surfaces as [`Error::AuthRequired`].
#[derive(Clone)]
pub struct OneShotClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialStore>,
}

impl OneShotClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the server root (e.g. `http://127.0.0.1:5000` for a
    /// terminal or `https://relay.example` for the relay).
    pub fn new(
        base_url: Url,
        credentials: Arc<dyn CredentialStore>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
            credentials,
        }
    }

    /// The server root all paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The credential source attached to every call.
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Resolve a relative path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Send a request and decode the JSON response body.
    ///
    /// An empty success body decodes as `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("{} {}", method, url);

        let token = self.credentials.access_token();
        let resp = self
            .send(method.clone(), url.clone(), body, token.as_ref())
            .await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return parse_body(resp).await;
        }

        debug!(url = %url, "401 received, refreshing credential once");
        let fresh = self.credentials.refresh().await.map_err(|e| {
            warn!(error = %e, "credential refresh failed");
            Error::AuthRequired {
                message: e.to_string(),
            }
        })?;

        let retry = self.send(method, url, body, Some(&fresh)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthRequired {
                message: "credential rejected after refresh".into(),
            });
        }
        parse_body(retry).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        token: Option<&SecretString>,
    ) -> Result<reqwest::Response, Error> {
        let mut req = self.http.request(method, url);
        if let Some(token) = token {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(Error::Transport)
    }
}

/// Paths join under the base only when it ends in `/`.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

async fn parse_body(resp: reqwest::Response) -> Result<Value, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;

    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            body,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}
