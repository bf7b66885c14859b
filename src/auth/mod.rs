//! Token acquisition against the Microsoft identity platform.
//!
//! Tokens are taken from the persistent cache when still valid, renewed
//! silently with the cached refresh token, and only as a last resort obtained
//! through an interactive browser sign-in (authorization code + PKCE on a
//! loopback redirect).

pub mod loopback;
pub mod token_cache;

use anyhow::Result as AnyResult;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::Url;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::AuthConfig;
use crate::error::AuthError;

use loopback::{authorize_url, new_state, LoopbackListener, Pkce};
pub use token_cache::{CachedToken, TokenCache};

/// Scopes added to every request so a refresh token and an id token come back.
const OIDC_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

/// Bearer credential for the contact store.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    account: Option<String>,
    expires_at: i64,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            account: None,
            expires_at: i64::MAX,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.secret)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("account", &self.account)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl From<&CachedToken> for AccessToken {
    fn from(token: &CachedToken) -> Self {
        Self {
            secret: token.access_token.clone(),
            account: token.account.clone(),
            expires_at: token.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Signs the user in and keeps the credential cache current.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    http: reqwest::Client,
    client_id: String,
    tenant: String,
    authorize_endpoint: Url,
    token_endpoint: Url,
    scopes: Vec<String>,
    redirect_port: u16,
    interactive: bool,
    announce_url: bool,
    cache: TokenCache,
}

impl IdentityProvider {
    pub fn new(config: &AuthConfig, http: reqwest::Client) -> AnyResult<Self> {
        Ok(Self {
            http,
            client_id: config.require_client_id()?.to_string(),
            tenant: config.tenant.clone(),
            authorize_endpoint: config.authorize_endpoint()?,
            token_endpoint: config.token_endpoint()?,
            scopes: config.scopes.clone(),
            redirect_port: config.redirect_port,
            interactive: config.interactive,
            announce_url: false,
            cache: TokenCache::new(config.token_cache.clone()),
        })
    }

    /// Allow or forbid the interactive browser flow.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Print the sign-in URL on stderr in addition to opening the browser.
    pub fn with_announce_url(mut self, announce: bool) -> Self {
        self.announce_url = announce;
        self
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Account name of the cached credential, if any.
    pub fn cached_account(&self) -> Option<String> {
        self.cache.load().ok().flatten().and_then(|t| t.account)
    }

    /// Silent first, interactive when the cache cannot produce a token.
    pub async fn acquire_token(&self, cancel: &CancelToken) -> Result<AccessToken, AuthError> {
        match self.acquire_silent(cancel).await {
            Ok(token) => Ok(token),
            Err(err) if err.needs_interaction() => {
                if !self.interactive {
                    return Err(AuthError::InteractionRequired);
                }
                info!(reason = %err, "interactive sign-in required");
                self.acquire_interactive(cancel).await
            }
            Err(err) => Err(err),
        }
    }

    /// Use the cached access token or redeem the cached refresh token.
    pub async fn acquire_silent(&self, cancel: &CancelToken) -> Result<AccessToken, AuthError> {
        let cached = self
            .cache
            .load()?
            .filter(|t| t.issued_for(&self.client_id, &self.tenant))
            .ok_or(AuthError::InteractionRequired)?;

        if cached.is_fresh(now()) {
            debug!("using cached access token");
            return Ok(AccessToken::from(&cached));
        }

        let refresh_token = cached
            .refresh_token
            .as_deref()
            .ok_or(AuthError::InteractionRequired)?;
        let scope = self.request_scope();
        let form = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        let token = cancel
            .run(self.redeem(&form, Some(&cached)), || AuthError::Cancelled)
            .await?;
        info!("renewed access token silently");
        Ok(AccessToken::from(&token))
    }

    /// Run the browser sign-in and cache the result.
    pub async fn acquire_interactive(&self, cancel: &CancelToken) -> Result<AccessToken, AuthError> {
        let listener = LoopbackListener::bind(self.redirect_port).await?;
        let redirect_uri = listener.redirect_uri();
        let pkce = Pkce::generate();
        let state = new_state();
        let url = authorize_url(
            &self.authorize_endpoint,
            &self.client_id,
            &redirect_uri,
            &self.request_scopes(),
            &state,
            &pkce,
        );

        info!(%url, "opening browser for sign-in");
        if self.announce_url {
            eprintln!("Sign in with your browser:\n  {}", url);
        }
        if let Err(err) = open::that(url.as_str()) {
            warn!(error = %err, "failed to open browser");
            if !self.announce_url {
                eprintln!("Open this URL to sign in: {}", url);
            }
        }

        let code = listener.wait_for_code(&state, cancel).await?;
        let scope = self.request_scope();
        let form = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("scope", scope.as_str()),
        ];
        let token = cancel
            .run(self.redeem(&form, None), || AuthError::Cancelled)
            .await?;
        info!(account = token.account.as_deref().unwrap_or("unknown"), "signed in");
        Ok(AccessToken::from(&token))
    }

    /// Post a grant to the token endpoint and cache the issued token.
    async fn redeem(
        &self,
        form: &[(&str, &str)],
        previous: Option<&CachedToken>,
    ) -> Result<CachedToken, AuthError> {
        let response = self
            .http
            .post(self.token_endpoint.clone())
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(token_endpoint_error(status.as_u16(), &body));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        let token = CachedToken {
            access_token: parsed.access_token,
            refresh_token: parsed
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            expires_at: now() + parsed.expires_in,
            scopes: parsed
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| self.scopes.clone()),
            account: parsed
                .id_token
                .as_deref()
                .and_then(account_from_id_token)
                .or_else(|| previous.and_then(|p| p.account.clone())),
            client_id: self.client_id.clone(),
            tenant: self.tenant.clone(),
        };
        self.cache.save(&token)?;
        Ok(token)
    }

    fn request_scopes(&self) -> Vec<String> {
        let mut scopes = self.scopes.clone();
        for extra in OIDC_SCOPES {
            if !scopes.iter().any(|s| s.eq_ignore_ascii_case(extra)) {
                scopes.push(extra.to_string());
            }
        }
        scopes
    }

    fn request_scope(&self) -> String {
        self.request_scopes().join(" ")
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn token_endpoint_error(status: u16, body: &str) -> AuthError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) => AuthError::TokenEndpoint {
            code: err.error,
            description: err
                .error_description
                .map(|d| d.lines().next().unwrap_or_default().to_string())
                .unwrap_or_default(),
        },
        Err(_) => AuthError::TokenEndpoint {
            code: format!("http_{}", status),
            description: body.chars().take(200).collect(),
        },
    }
}

/// Read `preferred_username` from the (unverified) id token payload.
fn account_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("preferred_username")
        .or_else(|| claims.get("email"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn provider(temp: &TempDir, extra: &str) -> IdentityProvider {
        let raw = format!(
            "[auth]\nclient_id = \"client\"\ntoken_cache = \"{}\"\n{}",
            temp.path().join("token.json").display(),
            extra
        );
        let config = config::parse(&raw, PathBuf::from("test.toml")).unwrap();
        IdentityProvider::new(&config.auth, reqwest::Client::new()).unwrap()
    }

    fn cached(expires_at: i64, refresh: Option<&str>) -> CachedToken {
        CachedToken {
            access_token: "cached-access".into(),
            refresh_token: refresh.map(str::to_string),
            expires_at,
            scopes: vec![],
            account: Some("jo@example.com".into()),
            client_id: "client".into(),
            tenant: "consumers".into(),
        }
    }

    #[test]
    fn test_account_from_id_token() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"preferred_username":"jo@example.com"}"#);
        let token = format!("header.{}.signature", payload);
        assert_eq!(account_from_id_token(&token).as_deref(), Some("jo@example.com"));
        assert_eq!(account_from_id_token("garbage"), None);
    }

    #[test]
    fn test_token_endpoint_error_decoding() {
        let err = token_endpoint_error(
            400,
            r#"{"error":"invalid_grant","error_description":"AADSTS70000: expired\r\nTrace ID: x"}"#,
        );
        match err {
            AuthError::TokenEndpoint { code, description } => {
                assert_eq!(code, "invalid_grant");
                assert_eq!(description, "AADSTS70000: expired");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = token_endpoint_error(502, "Bad Gateway");
        assert!(matches!(err, AuthError::TokenEndpoint { ref code, .. } if code == "http_502"));
        assert!(!err.needs_interaction());
    }

    #[test]
    fn test_request_scopes_add_oidc_scopes_once() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp, "scopes = [\"Contacts.ReadWrite\", \"offline_access\"]");
        assert_eq!(
            p.request_scopes(),
            vec!["Contacts.ReadWrite", "offline_access", "openid", "profile"]
        );
    }

    #[tokio::test]
    async fn test_fresh_cached_token_is_reused() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp, "");
        p.cache().save(&cached(now() + 3600, None)).unwrap();

        let token = p.acquire_token(&CancelToken::new()).await.unwrap();
        assert_eq!(token.secret(), "cached-access");
        assert_eq!(token.account(), Some("jo@example.com"));
        assert_eq!(token.authorization_header(), "Bearer cached-access");
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_needs_interaction() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp, "interactive = false");
        p.cache().save(&cached(now() - 10, None)).unwrap();

        let err = p.acquire_token(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::InteractionRequired));
    }

    #[tokio::test]
    async fn test_token_for_other_client_is_ignored() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp, "interactive = false");
        let mut token = cached(now() + 3600, None);
        token.client_id = "someone-else".into();
        p.cache().save(&token).unwrap();

        let err = p.acquire_token(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::InteractionRequired));
    }

    #[tokio::test]
    async fn test_cached_account_follows_cache_file() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp, "");
        assert_eq!(p.cached_account(), None);

        p.cache().save(&cached(now() + 3600, None)).unwrap();
        assert_eq!(p.cached_account().as_deref(), Some("jo@example.com"));

        assert!(p.cache().delete().unwrap());
        assert_eq!(p.cached_account(), None);
    }
}
