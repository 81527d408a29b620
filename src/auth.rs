use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::error::{Error, Result, ValidationError};
use crate::types::{DeviceCode, Token};

pub const DEFAULT_CLIENT_ID: &str = "home_assistant";
pub(crate) const TOKEN_PATH: &str = "api/v0/oauth/token";
pub(crate) const PAIRING_PATH: &str = "api/v0/client/user-devices";

const PAIRING_CLIENT: &str = "ios";
const PAIRED_CLIENT_ID: &str = "app";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_EXPIRES_IN: u64 = 3600;
const EXPIRY_MARGIN_SECS: i64 = 15 * 60;
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 3600;
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_POLL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct TokenState {
    client_id: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: String,
    expires_at: Option<DateTime<Utc>>,
    authenticated_platform: Option<String>,
}

/// Bearer token material plus the OAuth2 exchanges that produce it.
#[derive(Debug)]
pub(crate) struct TokenStore {
    state: Mutex<TokenState>,
}

fn token_url(base_url: &str) -> String {
    format!("{}/{TOKEN_PATH}", base_url.trim_end_matches('/'))
}

fn expiry_after(seconds: u64) -> DateTime<Utc> {
    let seconds = seconds.min(MAX_LIFETIME_SECS) as i64;
    Utc::now() + TimeDelta::seconds(seconds)
}

/// `expires_in` arrives as a number or a numeric string; anything else means
/// the default lifetime.
fn expires_in(data: &Value) -> u64 {
    match data.get("expires_in") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|s| *s > 0)
    .unwrap_or(DEFAULT_EXPIRES_IN)
}

fn non_empty_str<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

impl TokenStore {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(TokenState {
                client_id: client_id.into(),
                access_token: None,
                refresh_token: None,
                token_type: "Bearer".to_string(),
                expires_at: None,
                authenticated_platform: None,
            }),
        }
    }

    pub fn client_id(&self) -> String {
        self.state.lock().client_id.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.lock().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.lock().refresh_token.clone()
    }

    pub fn authenticated_platform(&self) -> Option<String> {
        self.state.lock().authenticated_platform.clone()
    }

    pub fn authorization_header(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .access_token
            .as_ref()
            .map(|t| format!("{} {t}", state.token_type))
    }

    pub fn is_token_valid(&self) -> bool {
        let state = self.state.lock();
        state.access_token.is_some() && state.expires_at.is_some_and(|at| Utc::now() < at)
    }

    pub fn is_token_expiring_soon(&self) -> bool {
        self.state
            .lock()
            .expires_at
            .is_some_and(|at| Utc::now() > at - TimeDelta::seconds(EXPIRY_MARGIN_SECS))
    }

    pub fn set_refresh_token(&self, refresh_token: impl Into<String>) {
        self.state.lock().refresh_token = Some(refresh_token.into());
    }

    /// Restore persisted tokens. Lifetime defaults to one hour.
    pub fn set_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<u64>,
    ) -> Result<()> {
        if access_token.trim().is_empty() {
            return Err(ValidationError::InvalidArgument(
                "access_token cannot be empty".to_string(),
            )
            .into());
        }
        let mut state = self.state.lock();
        state.access_token = Some(access_token.to_string());
        state.refresh_token = refresh_token
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        state.token_type = "Bearer".to_string();
        state.expires_at = Some(expiry_after(expires_in.unwrap_or(DEFAULT_EXPIRES_IN)));
        Ok(())
    }

    fn store_token_response(&self, data: &Value, base_url: &str) -> Option<Token> {
        let access_token = non_empty_str(data, "access_token")?.to_string();
        let lifetime = expires_in(data);
        let mut state = self.state.lock();
        state.access_token = Some(access_token.clone());
        if let Some(refresh) = non_empty_str(data, "refresh_token") {
            state.refresh_token = Some(refresh.to_string());
        }
        state.token_type = non_empty_str(data, "token_type")
            .unwrap_or("Bearer")
            .to_string();
        state.expires_at = Some(expiry_after(lifetime));
        state.authenticated_platform = Some(base_url.trim_end_matches('/').to_string());
        Some(Token {
            access_token,
            refresh_token: state.refresh_token.clone(),
            expires_in: Some(lifetime),
            token_type: Some(state.token_type.clone()),
        })
    }

    pub async fn request_device_code(
        &self,
        http: &reqwest::Client,
        base_url: &str,
    ) -> Result<DeviceCode> {
        let url = token_url(base_url);
        let client_id = self.client_id();
        let params = [("client_id", client_id.as_str()), ("scope", "read write")];
        debug!(url = %url, "requesting device code");

        let resp = http.post(&url).form(&params).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            return Err(Error::Auth(format!(
                "Failed to request device code. Status: {status}, Response: {body}"
            )));
        }

        let data: Value = serde_json::from_str(&body)
            .map_err(|e| Error::Auth(format!("Invalid device code response: {e}")))?;
        let missing: Vec<&str> = [
            "device_code",
            "user_code",
            "verification_uri",
            "expires_in",
            "interval",
        ]
        .into_iter()
        .filter(|f| data.get(*f).is_none_or(Value::is_null))
        .collect();
        if !missing.is_empty() {
            return Err(Error::Auth(format!(
                "Missing required fields in response: {}",
                missing.join(", ")
            )));
        }

        let text = |key: &str| -> String {
            match &data[key] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        };
        let seconds = |key: &str| -> Result<u64> {
            match &data[key] {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| Error::Auth(format!("Invalid {key} in device code response")))
        };

        let verification_uri = text("verification_uri");
        let user_code = text("user_code");
        let verification_uri_complete = match non_empty_str(&data, "verification_uri_complete") {
            Some(uri) => uri.to_string(),
            None => format!("{verification_uri}?user_code={user_code}"),
        };

        Ok(DeviceCode {
            device_code: text("device_code"),
            user_code,
            verification_uri,
            verification_uri_complete,
            expires_in: seconds("expires_in")?,
            interval: seconds("interval")?,
        })
    }

    /// Poll the token endpoint until the user approves, the server refuses,
    /// or `timeout` runs out (`Ok(None)`).
    pub async fn poll_for_token(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        device_code: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Option<Token>> {
        if device_code.trim().is_empty() {
            return Err(
                ValidationError::InvalidArgument("device_code cannot be empty".into()).into(),
            );
        }
        if interval < MIN_POLL_INTERVAL {
            return Err(ValidationError::InvalidArgument(
                "interval must be at least 1 second".into(),
            )
            .into());
        }
        if timeout < MIN_POLL_TIMEOUT {
            return Err(ValidationError::InvalidArgument(
                "timeout must be at least 10 seconds".into(),
            )
            .into());
        }

        let url = token_url(base_url);
        let client_id = self.client_id();
        let params = [
            ("client_id", client_id.as_str()),
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", device_code),
        ];
        let start = Instant::now();
        let mut interval = interval;
        let mut attempt = 0u32;

        while start.elapsed() < timeout {
            attempt += 1;
            let sent = http.post(&url).form(&params).send().await;
            let resp = match sent {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(attempt, error = %e, "token poll transport error, retrying");
                    sleep(interval).await;
                    continue;
                }
            };
            let status = resp.status().as_u16();
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(attempt, error = %e, "token poll body unreadable, retrying");
                    sleep(interval).await;
                    continue;
                }
            };
            let data: Value = serde_json::from_str(&body)
                .map_err(|e| Error::Auth(format!("Polling failed: {e}")))?;

            if status == 200
                && let Some(token) = self.store_token_response(&data, base_url)
            {
                debug!(attempt, "device authorization granted");
                return Ok(Some(token));
            }

            if status == 400 {
                let error = data
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown_error");
                match error {
                    "authorization_pending" => {
                        trace!(attempt, "authorization pending");
                    }
                    "slow_down" => {
                        interval += SLOW_DOWN_STEP;
                        debug!(attempt, interval_secs = interval.as_secs(), "server asked to slow down");
                    }
                    "expired_token" => return Err(Error::Auth("Device code has expired".into())),
                    "access_denied" => return Err(Error::Auth("User denied authorization".into())),
                    other => return Err(Error::Auth(format!("Authorization error: {other}"))),
                }
                sleep(interval).await;
                continue;
            }

            return Err(Error::Auth(format!(
                "Token polling failed. Status: {status}, Response: {body}"
            )));
        }

        debug!(attempt, "device authorization timed out");
        Ok(None)
    }

    pub async fn refresh(&self, http: &reqwest::Client, base_url: &str) -> Result<Token> {
        let (refresh_token, client_id) = {
            let state = self.state.lock();
            (state.refresh_token.clone(), state.client_id.clone())
        };
        let refresh_token =
            refresh_token.ok_or_else(|| Error::Auth("Refresh token is required".into()))?;

        let url = token_url(base_url);
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client_id.as_str()),
        ];
        debug!(url = %url, "refreshing access token");

        let resp = http.post(&url).form(&params).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            return Err(Error::Auth(format!(
                "Failed to refresh access token. Status: {status}, Response: {body}"
            )));
        }
        let data: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        self.store_token_response(&data, base_url)
            .ok_or_else(|| Error::Auth("Access token missing or invalid in response".into()))
    }

    /// Legacy username/password pairing. The long-lived pairing token becomes
    /// the refresh token, exchanged under the mobile app's client id.
    pub async fn pair(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        username: &str,
        password: &str,
        device_name: &str,
        device_id: &str,
    ) -> Result<Token> {
        let url = format!("{}/{PAIRING_PATH}", base_url.trim_end_matches('/'));
        let params = [
            ("username", username),
            ("password", password),
            ("client", PAIRING_CLIENT),
            ("deviceName", device_name),
            ("deviceUniqueIdentifier", device_id),
        ];
        debug!(url = %url, device = device_name, "requesting pairing token");

        let resp = http.post(&url).form(&params).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            return Err(Error::Auth(format!(
                "Failed to request pairing token. Status: {status}, Response: {body}"
            )));
        }
        let data: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let pairing = non_empty_str(&data, "pairingToken")
            .ok_or_else(|| Error::Auth("Pairing token missing in response".into()))?
            .to_string();

        {
            let mut state = self.state.lock();
            state.client_id = PAIRED_CLIENT_ID.to_string();
            state.refresh_token = Some(pairing);
        }
        self.refresh(http, base_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_tokens_validates_and_defaults_lifetime() {
        let store = TokenStore::new(DEFAULT_CLIENT_ID);
        assert!(!store.is_token_valid());
        assert!(store.set_tokens("  ", None, None).is_err());

        store.set_tokens("acc", Some("ref"), None).unwrap();
        assert!(store.is_token_valid());
        assert!(!store.is_token_expiring_soon());
        assert_eq!(store.refresh_token().as_deref(), Some("ref"));
        assert_eq!(store.authorization_header().as_deref(), Some("Bearer acc"));
    }

    #[test]
    fn short_lifetime_is_expiring_soon() {
        let store = TokenStore::new(DEFAULT_CLIENT_ID);
        store.set_tokens("acc", None, Some(600)).unwrap();
        assert!(store.is_token_valid());
        assert!(store.is_token_expiring_soon());
    }

    #[test]
    fn token_response_keeps_refresh_token_when_absent() {
        let store = TokenStore::new(DEFAULT_CLIENT_ID);
        store.set_refresh_token("r1");
        let token = store
            .store_token_response(&json!({"access_token": "a2", "expires_in": "120"}), "https://x/")
            .unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));
        assert_eq!(token.expires_in, Some(120));
        assert_eq!(store.authenticated_platform().as_deref(), Some("https://x"));

        assert!(store.store_token_response(&json!({"access_token": ""}), "https://x").is_none());
    }

    #[tokio::test]
    async fn poll_rejects_bad_arguments_before_any_request() {
        let store = TokenStore::new(DEFAULT_CLIENT_ID);
        let http = reqwest::Client::new();
        let base = "http://127.0.0.1:9";
        let one = Duration::from_secs(1);
        let ten = Duration::from_secs(10);

        for (code, interval, timeout) in [
            ("", one, ten),
            ("dc", Duration::from_millis(500), ten),
            ("dc", one, Duration::from_secs(5)),
        ] {
            let err = store
                .poll_for_token(&http, base, code, interval, timeout)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Validation);
        }
    }
}
