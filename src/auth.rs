//! Delegated-authorization credential management for the Google providers.
//!
//! One credential covers mail, calendar, and documents. The manager owns the
//! token exclusively; capability providers borrow an access token per call
//! and never persist it. Acquisition order: in-memory cache, persisted token
//! file, silent refresh, interactive authorization-code flow with a loopback
//! listener. Every successful grant or refresh is persisted.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tiny_http::{Response, Server};
use url::form_urlencoded;

use crate::{write_json_atomic, FailureKind, Settings, ToolFailure, UserIdentity};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Scopes for the mail/calendar/document capabilities.
const GOOGLE_SCOPES: &str = "https://www.googleapis.com/auth/gmail.send \
https://www.googleapis.com/auth/gmail.readonly \
https://www.googleapis.com/auth/calendar.events \
https://www.googleapis.com/auth/drive.file \
https://www.googleapis.com/auth/documents \
https://www.googleapis.com/auth/userinfo.profile \
https://www.googleapis.com/auth/userinfo.email";

const OAUTH_STATE: &str = "valet";

/// Refuse tokens this close to expiry so a call in flight doesn't outlive
/// its credential.
const EXPIRY_SKEW_SECS: i64 = 60;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredCredential {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) refresh_token: Option<String>,
    /// Unix timestamp after which the access token is invalid.
    pub(crate) expires_at: i64,
    #[serde(default)]
    pub(crate) scope: Option<String>,
}

impl StoredCredential {
    pub(crate) fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - EXPIRY_SKEW_SECS > now
    }

    fn from_token_response(
        value: &serde_json::Value,
        previous_refresh: Option<&str>,
    ) -> Result<Self, AuthError> {
        let access_token = value
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthError::Upstream("token response missing access_token".into()))?
            .to_string();
        let expires_in = value.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
        // Google omits the refresh token on re-grants and refreshes; keep
        // the one we already have.
        let refresh_token = value
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| previous_refresh.map(|s| s.to_string()));
        Ok(StoredCredential {
            access_token,
            refresh_token,
            expires_at: Utc::now().timestamp() + expires_in,
            scope: value.get("scope").and_then(|v| v.as_str()).map(|s| s.to_string()),
        })
    }
}

#[derive(Debug)]
pub(crate) enum AuthError {
    /// No usable credential and no interactive path in this context.
    Required(String),
    /// Refresh failed and no interactive fallback is available.
    Expired(String),
    /// OAuth client id/secret are not configured at all.
    NotConfigured(String),
    Upstream(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Required(msg) => write!(f, "authorization required: {msg}"),
            AuthError::Expired(msg) => write!(f, "authorization expired: {msg}"),
            AuthError::NotConfigured(msg) => write!(f, "not configured: {msg}"),
            AuthError::Upstream(msg) => write!(f, "authorization failed: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ToolFailure {
    fn from(err: AuthError) -> Self {
        let kind = match &err {
            AuthError::Required(_) => FailureKind::AuthRequired,
            AuthError::Expired(_) => FailureKind::AuthExpired,
            AuthError::NotConfigured(_) => FailureKind::NotConfigured,
            AuthError::Upstream(_) => FailureKind::UpstreamError,
        };
        ToolFailure { kind, message: err.to_string() }
    }
}

pub(crate) struct CredentialManager {
    client_id: Option<String>,
    client_secret: Option<String>,
    token_path: PathBuf,
    identity_path: PathBuf,
    /// Whether an interactive consent flow may run in this execution
    /// context (true for the CLI, false inside non-interactive turns).
    interactive: bool,
    // Refresh is a critical section: concurrent acquires must not race to
    // refresh the same credential.
    cached: Mutex<Option<StoredCredential>>,
    agent: ureq::Agent,
}

impl CredentialManager {
    pub(crate) fn new(settings: &Settings, interactive: bool) -> Self {
        CredentialManager {
            client_id: settings.google_client_id.clone(),
            client_secret: settings.google_client_secret.clone(),
            token_path: settings.token_path.clone(),
            identity_path: settings.identity_path.clone(),
            interactive,
            cached: Mutex::new(None),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(HTTP_TIMEOUT)
                .timeout_read(HTTP_TIMEOUT)
                .timeout_write(HTTP_TIMEOUT)
                .build(),
        }
    }

    fn client(&self) -> Result<(&str, &str), AuthError> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(AuthError::NotConfigured(
                "GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET are not set".into(),
            )),
        }
    }

    /// Return a currently valid access token, acquiring or refreshing the
    /// underlying credential as needed.
    pub(crate) fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.acquire()?.access_token)
    }

    pub(crate) fn acquire(&self) -> Result<StoredCredential, AuthError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().timestamp();

        if let Some(cred) = cached.as_ref() {
            if cred.is_fresh(now) {
                return Ok(cred.clone());
            }
        }

        let on_disk = self.load_persisted();
        if let Some(cred) = &on_disk {
            if cred.is_fresh(now) {
                *cached = Some(cred.clone());
                return Ok(cred.clone());
            }
        }

        // Expired (or memory-only stale): try a silent refresh first.
        let had_credential = cached.is_some() || on_disk.is_some();
        let refresh_token = cached
            .as_ref()
            .or(on_disk.as_ref())
            .and_then(|c| c.refresh_token.clone());
        if let Some(refresh_token) = refresh_token {
            match self.refresh(&refresh_token) {
                Ok(cred) => {
                    self.persist(&cred);
                    *cached = Some(cred.clone());
                    return Ok(cred);
                }
                Err(e) => {
                    eprintln!("[auth] token refresh failed, discarding credential: {e}");
                    *cached = None;
                }
            }
        }

        if !self.interactive {
            return if had_credential {
                Err(AuthError::Expired(
                    "stored credential could not be refreshed; run `valet auth`".into(),
                ))
            } else {
                Err(AuthError::Required(
                    "no stored credential; run `valet auth` to authorize".into(),
                ))
            };
        }

        let cred = self.interactive_flow("127.0.0.1", 0)?;
        self.persist(&cred);
        *cached = Some(cred.clone());
        Ok(cred)
    }

    /// Run the interactive flow unconditionally (the `auth` subcommand),
    /// replacing whatever is stored.
    pub(crate) fn reauthorize(&self, bind: &str, port: u16) -> Result<StoredCredential, AuthError> {
        let cred = self.interactive_flow(bind, port)?;
        self.persist(&cred);
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        *cached = Some(cred.clone());
        Ok(cred)
    }

    fn load_persisted(&self) -> Option<StoredCredential> {
        let data = std::fs::read_to_string(&self.token_path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn persist(&self, cred: &StoredCredential) {
        match serde_json::to_value(cred) {
            Ok(value) => {
                if let Err(e) = write_json_atomic(&self.token_path, &value) {
                    eprintln!("[auth] failed to persist token: {e}");
                }
            }
            Err(e) => eprintln!("[auth] failed to encode token: {e}"),
        }
    }

    fn refresh(&self, refresh_token: &str) -> Result<StoredCredential, AuthError> {
        let (client_id, client_secret) = self.client()?;
        let payload = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", client_id)
            .append_pair("client_secret", client_secret)
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", refresh_token)
            .finish();
        let value = self.token_post(&payload)?;
        StoredCredential::from_token_response(&value, Some(refresh_token))
    }

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<StoredCredential, AuthError> {
        let (client_id, client_secret) = self.client()?;
        let payload = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", client_id)
            .append_pair("client_secret", client_secret)
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", redirect_uri)
            .finish();
        let value = self.token_post(&payload)?;
        StoredCredential::from_token_response(&value, None)
    }

    fn token_post(&self, payload: &str) -> Result<serde_json::Value, AuthError> {
        let response = self
            .agent
            .post(GOOGLE_TOKEN_URL)
            .set("content-type", "application/x-www-form-urlencoded")
            .send_string(payload);
        match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| AuthError::Upstream(format!("token decode failed: {e}"))),
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                Err(AuthError::Upstream(format!("token error {code}: {}", text.trim())))
            }
            Err(err) => Err(AuthError::Upstream(format!("token request failed: {err}"))),
        }
    }

    fn build_auth_url(&self, client_id: &str, redirect_uri: &str) -> String {
        format!(
            "{GOOGLE_AUTH_URL}?response_type=code&client_id={}&redirect_uri={}&scope={}&access_type=offline&prompt=consent&state={}",
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(GOOGLE_SCOPES),
            urlencoding::encode(OAUTH_STATE),
        )
    }

    /// Authorization-code flow with a loopback listener. Port 0 asks the OS
    /// for an ephemeral port.
    fn interactive_flow(&self, bind: &str, port: u16) -> Result<StoredCredential, AuthError> {
        let (client_id, _) = self.client()?;
        let client_id = client_id.to_string();

        let server = Server::http(format!("{bind}:{port}"))
            .map_err(|e| AuthError::Upstream(format!("callback listener: {e}")))?;
        let local_port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| AuthError::Upstream("callback listener has no port".into()))?;
        let redirect_uri = format!("http://{bind}:{local_port}/oauth/callback");
        let auth_url = self.build_auth_url(&client_id, &redirect_uri);

        println!("Open this URL to authorize:\n{auth_url}");
        eprintln!("[auth] waiting for callback on http://{bind}:{local_port}");

        for request in server.incoming_requests() {
            let url = request.url().to_string();
            if !url.starts_with("/oauth/callback") {
                let _ = request.respond(Response::from_string("ok"));
                continue;
            }
            let query = url.splitn(2, '?').nth(1).unwrap_or("");
            let params: HashMap<String, String> =
                form_urlencoded::parse(query.as_bytes()).into_owned().collect();
            if params.get("state").map(String::as_str) != Some(OAUTH_STATE) {
                let _ = request.respond(Response::from_string("state mismatch"));
                continue;
            }
            let Some(code) = params.get("code").cloned() else {
                let _ = request.respond(Response::from_string("missing code"));
                continue;
            };
            let cred = self.exchange_code(&code, &redirect_uri)?;
            let _ = request.respond(Response::from_string(
                "Authorized. You can close this tab and return to the terminal.",
            ));
            return Ok(cred);
        }
        Err(AuthError::Upstream("authorization listener closed without a code".into()))
    }

    /// Display name and primary address of the authorized account, cached on
    /// disk so repeated runs skip the lookup.
    pub(crate) fn user_identity(&self) -> Result<UserIdentity, AuthError> {
        if let Ok(data) = std::fs::read_to_string(&self.identity_path) {
            if let Ok(identity) = serde_json::from_str::<UserIdentity>(&data) {
                if identity.name.is_some() || identity.email.is_some() {
                    return Ok(identity);
                }
            }
        }

        let token = self.access_token()?;
        let response = self
            .agent
            .get(GOOGLE_USERINFO_URL)
            .set("authorization", &format!("Bearer {token}"))
            .call();
        let value: serde_json::Value = match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| AuthError::Upstream(format!("userinfo decode failed: {e}")))?,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                return Err(AuthError::Upstream(format!("userinfo error {code}: {}", text.trim())));
            }
            Err(err) => return Err(AuthError::Upstream(format!("userinfo failed: {err}"))),
        };
        let identity = UserIdentity {
            name: value.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()),
            email: value.get("email").and_then(|v| v.as_str()).map(|s| s.to_string()),
        };
        if let Ok(json) = serde_json::to_value(&identity) {
            if let Err(e) = write_json_atomic(&self.identity_path, &json) {
                eprintln!("[auth] failed to cache identity: {e}");
            }
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_settings(token_path: &Path, identity_path: &Path) -> Settings {
        let mut settings = Settings::for_tests();
        settings.google_client_id = Some("client-id".into());
        settings.google_client_secret = Some("client-secret".into());
        settings.token_path = token_path.to_path_buf();
        settings.identity_path = identity_path.to_path_buf();
        settings
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("valet_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("auth_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_persisted_credential_roundtrip() {
        // A token persisted by one manager must be usable by a fresh one
        // without any network or interactive step, as long as it is fresh.
        let token_path = scratch("roundtrip_token.json");
        let identity_path = scratch("roundtrip_identity.json");
        let _ = std::fs::remove_file(&token_path);
        let settings = test_settings(&token_path, &identity_path);

        let cred = StoredCredential {
            access_token: "ya29.test".into(),
            refresh_token: Some("1//refresh".into()),
            expires_at: Utc::now().timestamp() + 3600,
            scope: None,
        };
        let first = CredentialManager::new(&settings, false);
        first.persist(&cred);

        let second = CredentialManager::new(&settings, false);
        let loaded = second.acquire().unwrap();
        assert_eq!(loaded.access_token, "ya29.test");
        assert_eq!(loaded.refresh_token.as_deref(), Some("1//refresh"));

        std::fs::remove_file(&token_path).ok();
    }

    #[test]
    fn test_acquire_without_credential_is_auth_required() {
        let token_path = scratch("missing_token.json");
        let identity_path = scratch("missing_identity.json");
        let _ = std::fs::remove_file(&token_path);
        let settings = test_settings(&token_path, &identity_path);

        let manager = CredentialManager::new(&settings, false);
        match manager.acquire() {
            Err(AuthError::Required(_)) => {}
            other => panic!("expected AuthRequired, got {other:?}"),
        }
    }

    #[test]
    fn test_unconfigured_client_maps_to_not_configured() {
        let token_path = scratch("nocfg_token.json");
        let identity_path = scratch("nocfg_identity.json");
        let mut settings = test_settings(&token_path, &identity_path);
        settings.google_client_id = None;
        settings.google_client_secret = None;

        // An expired credential with a refresh token forces the refresh
        // path, which needs the client config.
        let cred = StoredCredential {
            access_token: "stale".into(),
            refresh_token: Some("1//refresh".into()),
            expires_at: Utc::now().timestamp() - 10,
            scope: None,
        };
        let manager = CredentialManager::new(&settings, false);
        manager.persist(&cred);
        let err = manager.acquire().unwrap_err();
        let failure: ToolFailure = err.into();
        // Refresh cannot even start without a client; either way the caller
        // sees a classified auth failure, never a panic.
        assert!(matches!(
            failure.kind,
            FailureKind::AuthExpired | FailureKind::NotConfigured
        ));
        std::fs::remove_file(&token_path).ok();
    }

    #[test]
    fn test_expiry_skew() {
        let now = Utc::now().timestamp();
        let fresh = StoredCredential {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: now + 3600,
            scope: None,
        };
        let nearly_expired = StoredCredential {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: now + 30,
            scope: None,
        };
        assert!(fresh.is_fresh(now));
        assert!(!nearly_expired.is_fresh(now));
    }

    #[test]
    fn test_token_response_keeps_previous_refresh_token() {
        let value = serde_json::json!({
            "access_token": "new-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        });
        let cred = StoredCredential::from_token_response(&value, Some("1//old")).unwrap();
        assert_eq!(cred.refresh_token.as_deref(), Some("1//old"));
        assert!(cred.is_fresh(Utc::now().timestamp()));
    }
}
