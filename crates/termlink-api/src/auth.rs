// Bearer credential sources for one-shot calls.
//
// The connectivity layer does not own authentication. It asks a
// `CredentialStore` for the current token and, on a 401, for exactly one
// refresh before giving up.

use std::sync::{PoisonError, RwLock};

use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::http::with_trailing_slash;
use crate::transport::TransportConfig;

/// External credential collaborator.
pub trait CredentialStore: Send + Sync {
    /// The bearer credential to attach, if any.
    fn access_token(&self) -> Option<SecretString>;

    /// Obtain a fresh credential after the current one was rejected.
    fn refresh(&self) -> BoxFuture<'_, Result<SecretString, Error>>;
}

// ── StaticToken ──────────────────────────────────────────────────────

/// A fixed token (or none). Refresh always fails.
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
    token: Option<SecretString>,
}

impl StaticToken {
    pub fn new(token: SecretString) -> Self {
        Self { token: Some(token) }
    }

    /// No credential at all; requests go out without an `Authorization` header.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl CredentialStore for StaticToken {
    fn access_token(&self) -> Option<SecretString> {
        self.token.clone()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<SecretString, Error>> {
        Box::pin(async {
            Err(Error::RefreshFailed {
                message: "static credential cannot be refreshed".into(),
            })
        })
    }
}

// ── JwtCredentials ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Access/refresh token pair backed by the backend's JWT refresh endpoint
/// (`POST {auth_base}/auth/jwt/refresh/ {refresh}` → `{access}`).
pub struct JwtCredentials {
    http: reqwest::Client,
    refresh_url: Url,
    access: RwLock<Option<SecretString>>,
    refresh_token: RwLock<Option<SecretString>>,
}

impl JwtCredentials {
    pub fn new(
        auth_base: &Url,
        access: Option<SecretString>,
        refresh: Option<SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let refresh_url = with_trailing_slash(auth_base.clone()).join("auth/jwt/refresh/")?;
        Ok(Self {
            http: transport.build_client()?,
            refresh_url,
            access: RwLock::new(access),
            refresh_token: RwLock::new(refresh),
        })
    }

    async fn do_refresh(&self) -> Result<SecretString, Error> {
        let refresh = self
            .refresh_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::RefreshFailed {
                message: "no refresh token available".into(),
            })?;

        debug!(url = %self.refresh_url, "refreshing access token");

        let resp = self
            .http
            .post(self.refresh_url.clone())
            .json(&serde_json::json!({ "refresh": refresh.expose_secret() }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "token refresh rejected");
            return Err(Error::RefreshFailed {
                message: format!("refresh endpoint answered HTTP {status}"),
            });
        }

        let body = resp.text().await?;
        let parsed: RefreshResponse =
            serde_json::from_str(&body).map_err(|e| Error::RefreshFailed {
                message: format!("unreadable refresh response: {e}"),
            })?;

        let access = SecretString::from(parsed.access);
        *self.access.write().unwrap_or_else(PoisonError::into_inner) = Some(access.clone());
        if let Some(rotated) = parsed.refresh {
            *self
                .refresh_token
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(SecretString::from(rotated));
        }
        Ok(access)
    }
}

impl CredentialStore for JwtCredentials {
    fn access_token(&self) -> Option<SecretString> {
        self.access
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<SecretString, Error>> {
        Box::pin(self.do_refresh())
    }
}
