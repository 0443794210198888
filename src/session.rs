//! Session credential handling.
//!
//! Login happens once, on a blocking client, before any async work starts.
//! The resulting [`Credential`] is handed to the fetch phase as a serialized
//! snapshot rather than as a shared live session; the fetch phase imports it and
//! refreshes the access token itself if it has expired in the meantime.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Endpoints;
use crate::error::AuthError;

const TOKEN_FILE: &str = "oauth2_token.json";
pub(crate) const USER_AGENT: &str = "Mozilla/5.0";
const AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Opaque authenticated-session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp after which `access_token` is rejected.
    pub expires_at: i64,
    /// Unix timestamp after which `refresh_token` can no longer be exchanged.
    pub refresh_token_expires_at: i64,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refresh_token_expires_in: Option<i64>,
}

impl Credential {
    pub fn from_token_response(response: TokenResponse, now: i64) -> Self {
        let refresh_ttl = response.refresh_token_expires_in.unwrap_or(response.expires_in);
        Self {
            token_type: response.token_type,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: now + response.expires_in,
            refresh_token_expires_at: now + refresh_ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn can_refresh_at(&self, now: i64) -> bool {
        now < self.refresh_token_expires_at
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Snapshot for handing the credential to another phase.
    pub fn export(&self) -> Result<Vec<u8>, AuthError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AuthError::InvalidCredentials(format!("cannot serialize token: {e}")))?;
        Ok(STANDARD.encode(json).into_bytes())
    }

    pub fn import(snapshot: &[u8]) -> Result<Self, AuthError> {
        let json = STANDARD
            .decode(snapshot)
            .map_err(|e| AuthError::InvalidCredentials(format!("malformed snapshot: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| AuthError::InvalidCredentials(format!("malformed snapshot: {e}")))
    }
}

/// Source of credentials: a token cache or an interactive login.
pub trait AuthBackend {
    /// Resume a session from `cache_dir`. Must fail with [`AuthError::NotFound`] or
    /// [`AuthError::InvalidCredentials`] when a fresh login is required.
    fn resume(&self, cache_dir: &Path) -> Result<Credential, AuthError>;

    fn login(&self, username: &str, password: &str) -> Result<Credential, AuthError>;
}

/// Owns the credential for the lifetime of the login phase.
#[derive(Debug)]
pub struct CredentialSession {
    credential: Credential,
}

impl CredentialSession {
    /// Log in from the token cache, falling back to username/password.
    ///
    /// The cache is written only after a successful username/password login.
    pub fn obtain<B: AuthBackend>(
        backend: &B,
        cache_dir: &Path,
        username: &str,
        password: &str,
    ) -> Result<Self, AuthError> {
        match backend.resume(cache_dir) {
            Ok(credential) => {
                info!("Logged in with cached token");
                Ok(Self { credential })
            }
            Err(e) if e.allows_fallback() => {
                info!("Cached login unavailable ({e}), signing in as {username}");
                let credential = backend.login(username, password)?;
                store_cached(cache_dir, &credential)?;
                info!("Logged in with username/password, new token saved to {}", cache_dir.display());
                Ok(Self { credential })
            }
            Err(e) => Err(e),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn export(&self) -> Result<Vec<u8>, AuthError> {
        self.credential.export()
    }
}

fn token_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(TOKEN_FILE)
}

pub fn load_cached(cache_dir: &Path) -> Result<Credential, AuthError> {
    let path = token_path(cache_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(AuthError::NotFound),
        Err(e) => return Err(AuthError::Cache(e)),
    };
    serde_json::from_str(&contents).map_err(|e| {
        AuthError::InvalidCredentials(format!("unreadable token cache {}: {e}", path.display()))
    })
}

pub fn store_cached(cache_dir: &Path, credential: &Credential) -> Result<(), AuthError> {
    fs::create_dir_all(cache_dir)?;
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| AuthError::InvalidCredentials(format!("cannot serialize token: {e}")))?;
    fs::write(token_path(cache_dir), json)?;
    Ok(())
}

pub(crate) fn error_for_status(status: StatusCode) -> AuthError {
    match status.as_u16() {
        401 | 403 => AuthError::InvalidCredentials(format!("HTTP {status}")),
        429 => AuthError::RateLimited,
        _ => AuthError::Connection(format!("HTTP {status}")),
    }
}

/// Blocking token backend using an OAuth2 password grant against the
/// deployment's token URL.
///
/// Garmin's production sign-in goes through an SSO ticket and an OAuth1 to
/// OAuth2 exchange, which this backend does not perform, so a fresh login only
/// succeeds against token services that accept the password grant. Cached
/// sessions in garth's `oauth2_token.json` layout are resumed as-is; a different
/// sign-in flow plugs in as another [`AuthBackend`].
pub struct GarminAuth {
    client: reqwest::blocking::Client,
    token_url: String,
}

impl GarminAuth {
    pub fn new(endpoints: &Endpoints) -> Result<Self, AuthError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(AUTH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            token_url: endpoints.token_url.clone(),
        })
    }
}

impl AuthBackend for GarminAuth {
    fn resume(&self, cache_dir: &Path) -> Result<Credential, AuthError> {
        let credential = load_cached(cache_dir)?;
        if !credential.can_refresh_at(chrono::Utc::now().timestamp()) {
            warn!("Cached refresh token has expired");
            return Err(AuthError::InvalidCredentials("cached session expired".to_string()));
        }
        Ok(credential)
    }

    fn login(&self, username: &str, password: &str) -> Result<Credential, AuthError> {
        debug!("Requesting token from {}", self.token_url);

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
            ])
            .send()
            .map_err(|e| AuthError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status));
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| AuthError::Connection(format!("unexpected token response: {e}")))?;
        Ok(Credential::from_token_response(token, chrono::Utc::now().timestamp()))
    }
}

/// Exchange the refresh token for a new access token.
pub async fn refresh_credential(
    http: &reqwest::Client,
    token_url: &str,
    credential: &Credential,
) -> Result<Credential, AuthError> {
    let response = http
        .post(token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", credential.refresh_token.as_str()),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Connection(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(error_for_status(status));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::Connection(format!("unexpected token response: {e}")))?;
    Ok(Credential::from_token_response(token, chrono::Utc::now().timestamp()))
}
