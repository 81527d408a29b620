use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::auth::{DEFAULT_CLIENT_ID, PAIRING_PATH, TOKEN_PATH, TokenStore};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::Command;
use crate::state::{ObserverError, StateRegistry, StatusObserver};
use crate::status::StatusSnapshot;
use crate::types::{DeviceCode, EventQuery, Platform, SystemSummary, Token, UserInfo};
use crate::{Error, Result};

const SYSTEMS_PATH: &str = "api/v0/client/ac-systems";
const ACCOUNT_PATH: &str = "api/v0/client/account";
const EVENTS_PATH: &str = "api/v0/client/ac-systems/events";
const STATUS_REL: &str = "ac-status";
const COMMANDS_REL: &str = "commands";

/// Anything that can deliver a settings command to a system. Snapshots hold a
/// weak handle to one so nested objects can send their own commands.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_command(&self, serial: &str, command: &Command) -> Result<()>;
}

pub struct ActronClientBuilder {
    platform: Option<Platform>,
    base_url: Option<String>,
    client_id: Option<String>,
    refresh_token: Option<String>,
    observers: Vec<StatusObserver>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<PathBuf>,
}

impl Default for ActronClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActronClientBuilder {
    pub fn new() -> Self {
        Self {
            platform: None,
            base_url: None,
            client_id: None,
            refresh_token: None,
            observers: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    /// Pin the backend. Disables detection from the systems listing.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Use an arbitrary API root. Disables platform detection.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn on_status(
        mut self,
        f: impl Fn(&str, &Value) -> std::result::Result<(), ObserverError> + Send + Sync + 'static,
    ) -> Self {
        self.observers.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ActronClient> {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::open(mode, path)?)),
            _ => None,
        };

        let (base_url, platform, auto_platform) = match (self.base_url, self.platform) {
            (Some(url), _) => {
                let url = url.trim_end_matches('/').to_string();
                let platform = Platform::from_base_url(&url);
                (url, platform, false)
            }
            (None, Some(platform)) => (platform.base_url().to_string(), Some(platform), false),
            (None, None) => (
                Platform::default().base_url().to_string(),
                Some(Platform::default()),
                true,
            ),
        };

        let tokens = TokenStore::new(
            self.client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
        );
        if let Some(refresh) = self.refresh_token {
            tokens.set_refresh_token(refresh);
        }

        let observers = self.observers;
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let mut state = StateRegistry::new();
            let sink: Weak<dyn CommandSink> = weak.clone();
            state.set_client(sink);
            for observer in observers {
                state.add_observer(observer);
            }
            ClientInner {
                http: tokio::sync::Mutex::new(None),
                base_url: RwLock::new(base_url),
                platform: RwLock::new(platform),
                auto_platform,
                tokens,
                systems: RwLock::new(Vec::new()),
                state: Mutex::new(state),
                logger,
            }
        });

        Ok(ActronClient { inner })
    }
}

struct ClientInner {
    /// Created on first use; `close` drops it.
    http: tokio::sync::Mutex<Option<reqwest::Client>>,
    base_url: RwLock<String>,
    platform: RwLock<Option<Platform>>,
    auto_platform: bool,
    tokens: TokenStore,
    systems: RwLock<Vec<SystemSummary>>,
    state: Mutex<StateRegistry>,
    logger: Option<Mutex<MessageLogger>>,
}

impl ClientInner {
    async fn http(&self) -> Result<reqwest::Client> {
        let mut session = self.http.lock().await;
        if let Some(http) = session.as_ref() {
            return Ok(http.clone());
        }
        debug!("creating HTTP session");
        let http = reqwest::Client::builder()
            .user_agent(concat!("actron-air/", env!("CARGO_PKG_VERSION")))
            .build()?;
        *session = Some(http.clone());
        Ok(http)
    }

    fn base_url(&self) -> String {
        self.base_url.read().clone()
    }

    fn log_request(&self, method: &str, path: &str, status: Option<u16>) {
        if let Some(logger) = &self.logger {
            logger.lock().log_request(method, path, status);
        }
    }

    fn switch_platform(&self, platform: Platform) {
        let url = platform.base_url();
        {
            let mut base = self.base_url.write();
            if *base == url {
                trace!(platform = %platform, "platform unchanged");
                return;
            }
            debug!(from = %base.as_str(), to = url, "switching platform");
            *base = url.to_string();
        }
        *self.platform.write() = Some(platform);
    }

    async fn ensure_token(&self) -> Result<()> {
        if self.tokens.is_token_valid() {
            return Ok(());
        }
        if self.tokens.refresh_token().is_none() {
            if self.tokens.access_token().is_some() {
                return Ok(());
            }
            return Err(Error::Auth(
                "Failed to initialize API: no access token or refresh token".into(),
            ));
        }
        let http = self.http().await?;
        let base = self.base_url();
        let result = self.tokens.refresh(&http, &base).await;
        self.log_request("POST", TOKEN_PATH, None);
        result
            .map(|_| ())
            .map_err(|e| Error::Auth(format!("Failed to initialize API: {e}")))
    }

    async fn execute(
        &self,
        http: &reqwest::Client,
        method: &Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut req = http.request(method.clone(), url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(auth) = self.tokens.authorization_header() {
            req = req.header(AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .map_err(|e| Error::Api(format!("Request failed: {e}")))
    }

    /// Authenticated call against the current base URL. A 401 gets one
    /// token refresh and one retry.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        self.ensure_token().await?;
        let http = self.http().await?;
        let base = self.base_url();
        let url = format!("{base}/{}", path.trim_start_matches('/'));
        debug!(method = %method, url = %url, "API request");

        let mut resp = self.execute(&http, &method, &url, query, body).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            self.log_request(method.as_str(), path, Some(401));
            if self.tokens.refresh_token().is_none() {
                return Err(Error::Auth("Refresh token is required".into()));
            }
            debug!(url = %url, "access token rejected, refreshing");
            let refreshed = self.tokens.refresh(&http, &base).await;
            self.log_request("POST", TOKEN_PATH, None);
            if let Err(e) = refreshed {
                return Err(Error::Auth(format!(
                    "Authentication failed and token refresh failed: {e}"
                )));
            }
            resp = self.execute(&http, &method, &url, query, body).await?;
            if resp.status() == StatusCode::UNAUTHORIZED {
                self.log_request(method.as_str(), path, Some(401));
                return Err(Error::Auth(
                    "Authentication failed after token refresh".into(),
                ));
            }
        }

        let status = resp.status().as_u16();
        self.log_request(method.as_str(), path, Some(status));
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Api(format!("Request failed: {e}")))?;
        if !(200..300).contains(&status) {
            return Err(Error::Status { status, body: text });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Api(format!("Invalid JSON response: {e}")))
    }

    fn link_for(&self, serial: &str, rel: &str) -> Result<String> {
        self.systems
            .read()
            .iter()
            .find(|s| s.serial.eq_ignore_ascii_case(serial))
            .and_then(|s| s.link(rel))
            .map(str::to_string)
            .ok_or_else(|| Error::MissingLink {
                rel: rel.to_string(),
                serial: serial.to_lowercase(),
            })
    }
}

#[async_trait]
impl CommandSink for ClientInner {
    async fn send_command(&self, serial: &str, command: &Command) -> Result<()> {
        let path = self.link_for(serial, COMMANDS_REL)?;
        let body = command.to_json();
        if let Some(logger) = &self.logger {
            logger.lock().log_command(serial, &body);
        }
        debug!(serial = %serial, "sending command");
        self.request(Method::POST, &path, &[], Some(&body)).await?;
        Ok(())
    }
}

fn parse_systems(body: &Value) -> Result<Vec<SystemSummary>> {
    let Some(Value::Array(entries)) = body.pointer("/_embedded/ac-system") else {
        return Err(Error::Api(
            "Unexpected systems response: missing _embedded.ac-system".into(),
        ));
    };
    Ok(entries
        .iter()
        .filter_map(|raw| match SystemSummary::deserialize(raw) {
            Ok(system) => Some(system),
            Err(e) => {
                warn!(error = %e, "skipping malformed system entry");
                None
            }
        })
        .collect())
}

fn newest_event_id(body: &Value) -> Option<String> {
    let first = match body {
        Value::Array(events) => events.first(),
        other => other.get("events").and_then(Value::as_array)?.first(),
    }?;
    match first.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Handle to the cloud API. Cheap to clone; clones share session, tokens
/// and state.
#[derive(Clone)]
pub struct ActronClient {
    inner: Arc<ClientInner>,
}

impl ActronClient {
    pub fn builder() -> ActronClientBuilder {
        ActronClientBuilder::new()
    }

    pub fn base_url(&self) -> String {
        self.inner.base_url()
    }

    /// `None` when a custom base URL is in use.
    pub fn platform(&self) -> Option<Platform> {
        *self.inner.platform.read()
    }

    pub async fn request_device_code(&self) -> Result<DeviceCode> {
        let http = self.inner.http().await?;
        let result = self
            .inner
            .tokens
            .request_device_code(&http, &self.base_url())
            .await;
        self.inner.log_request("POST", TOKEN_PATH, None);
        result
    }

    pub async fn poll_for_token(
        &self,
        device_code: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Option<Token>> {
        let http = self.inner.http().await?;
        let result = self
            .inner
            .tokens
            .poll_for_token(&http, &self.base_url(), device_code, interval, timeout)
            .await;
        self.inner.log_request("POST", TOKEN_PATH, None);
        result
    }

    pub async fn refresh_access_token(&self) -> Result<Token> {
        let http = self.inner.http().await?;
        let result = self.inner.tokens.refresh(&http, &self.base_url()).await;
        self.inner.log_request("POST", TOKEN_PATH, None);
        result
    }

    /// Legacy username/password pairing. A random device id is generated
    /// when none is given.
    pub async fn pair(
        &self,
        username: &str,
        password: &str,
        device_name: &str,
        device_id: Option<&str>,
    ) -> Result<Token> {
        let generated;
        let device_id = match device_id {
            Some(id) => id,
            None => {
                generated = Uuid::new_v4().to_string();
                generated.as_str()
            }
        };
        let http = self.inner.http().await?;
        let result = self
            .inner
            .tokens
            .pair(&http, &self.base_url(), username, password, device_name, device_id)
            .await;
        self.inner.log_request("POST", PAIRING_PATH, None);
        result
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.tokens.access_token()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.tokens.refresh_token()
    }

    pub fn set_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<u64>,
    ) -> Result<()> {
        self.inner
            .tokens
            .set_tokens(access_token, refresh_token, expires_in)
    }

    pub fn is_token_valid(&self) -> bool {
        self.inner.tokens.is_token_valid()
    }

    pub fn is_token_expiring_soon(&self) -> bool {
        self.inner.tokens.is_token_expiring_soon()
    }

    /// Base URL that issued the current tokens.
    pub fn authenticated_platform(&self) -> Option<String> {
        self.inner.tokens.authenticated_platform()
    }

    pub async fn get_user_info(&self) -> Result<UserInfo> {
        let body = self
            .inner
            .request(Method::GET, ACCOUNT_PATH, &[], None)
            .await?;
        UserInfo::deserialize(&body).map_err(|e| Error::Api(format!("Invalid account response: {e}")))
    }

    /// Fetch the account's systems, remember them for link lookups and pick
    /// the backend they belong to.
    pub async fn get_ac_systems(&self) -> Result<Vec<SystemSummary>> {
        let body = self
            .inner
            .request(Method::GET, SYSTEMS_PATH, &[("includeNeo", "true")], None)
            .await?;
        let systems = parse_systems(&body)?;
        debug!(count = systems.len(), "fetched systems");
        *self.inner.systems.write() = systems.clone();
        if self.inner.auto_platform {
            self.inner.switch_platform(Platform::detect(&systems));
        }
        Ok(systems)
    }

    pub fn systems(&self) -> Vec<SystemSummary> {
        self.inner.systems.read().clone()
    }

    pub async fn get_ac_status(&self, serial: &str) -> Result<Arc<StatusSnapshot>> {
        let path = self.inner.link_for(serial, STATUS_REL)?;
        let body = self.inner.request(Method::GET, &path, &[], None).await?;
        if let Some(logger) = &self.inner.logger {
            logger.lock().log_status(&serial.to_lowercase(), &body);
        }
        let snapshot = self.inner.state.lock().process_update(serial, &body);
        Ok(snapshot)
    }

    /// Refresh one system, or every known system when `serial` is `None`.
    pub async fn update_status(
        &self,
        serial: Option<&str>,
    ) -> Result<HashMap<String, Arc<StatusSnapshot>>> {
        let serials: Vec<String> = match serial {
            Some(s) => vec![s.to_lowercase()],
            None => self.systems().into_iter().map(|s| s.serial).collect(),
        };
        let mut updated = HashMap::with_capacity(serials.len());
        for serial in serials {
            let snapshot = self.get_ac_status(&serial).await?;
            updated.insert(serial, snapshot);
        }
        Ok(updated)
    }

    pub fn status(&self, serial: &str) -> Option<Arc<StatusSnapshot>> {
        self.inner.state.lock().get(serial)
    }

    /// Observers run under the state lock and must not call back into
    /// [`ActronClient::status`].
    pub fn on_status(
        &self,
        f: impl Fn(&str, &Value) -> std::result::Result<(), ObserverError> + Send + Sync + 'static,
    ) {
        self.inner.state.lock().add_observer(f);
    }

    pub async fn send_command(&self, serial: &str, command: &Command) -> Result<()> {
        self.inner.send_command(serial, command).await
    }

    pub async fn get_ac_events(&self, serial: &str, query: EventQuery) -> Result<Value> {
        let serial = serial.to_lowercase();
        let (kind, params): (&str, Vec<(&str, &str)>) = match &query {
            EventQuery::Latest => ("latest", vec![("serial", serial.as_str())]),
            EventQuery::Newer(id) => (
                "newer",
                vec![("serial", serial.as_str()), ("newerThanEventId", id.as_str())],
            ),
            EventQuery::Older(id) => (
                "older",
                vec![("serial", serial.as_str()), ("olderThanEventId", id.as_str())],
            ),
        };
        let path = format!("{EVENTS_PATH}/{kind}");
        let body = self.inner.request(Method::GET, &path, &params, None).await?;
        if !matches!(query, EventQuery::Older(_))
            && let Some(id) = newest_event_id(&body)
        {
            self.inner.state.lock().set_latest_event_id(&serial, id);
        }
        Ok(body)
    }

    pub fn latest_event_id(&self, serial: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .latest_event_id(serial)
            .map(str::to_string)
    }

    /// Drop the HTTP session. The next request opens a new one.
    pub async fn close(&self) {
        if self.inner.http.lock().await.take().is_some() {
            debug!("HTTP session closed");
        }
    }
}

#[async_trait]
impl CommandSink for ActronClient {
    async fn send_command(&self, serial: &str, command: &Command) -> Result<()> {
        self.inner.send_command(serial, command).await
    }
}
