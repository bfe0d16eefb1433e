//! Blocking `ureq` transport driven from the async controller.

#![allow(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use super::{DataApi, DirectoryApi, Envelope, ExportApi, RawDownload, SearchApi, SessionApi};
use crate::config::ServerConfig;
use crate::error::{ClientError, Result};
use crate::model::{
    DataStatus, JobProgress, JobStart, NewUser, PermissionInfo, PermissionSet, SearchHit,
    SystemConfig, UpdateRequest, User, UserRecord, UserUpdate,
};

/// Name of the cookie carrying the server session.
pub const SESSION_COOKIE: &str = "session_id";

const DOWNLOAD_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

struct RawResponse {
    status: u16,
    content_disposition: Option<String>,
    body: Vec<u8>,
}

struct HttpInner {
    agent: ureq::Agent,
    base_url: String,
    session_cookie: Mutex<Option<String>>,
}

/// HTTP implementation of every API seam.
///
/// The session cookie is the ambient credential: it is captured from
/// `Set-Cookie`, replayed on every request, and dropped when the server
/// expires it.
#[derive(Clone)]
pub struct HttpApi {
    inner: Arc<HttpInner>,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.inner.base_url)
            .field("has_session", &self.has_session_cookie())
            .finish()
    }
}

impl HttpApi {
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build();
        Self {
            inner: Arc::new(HttpInner {
                agent: ureq::Agent::new_with_config(agent_config),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                session_cookie: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    #[must_use]
    pub fn has_session_cookie(&self) -> bool {
        self.inner.session_cookie.lock().is_some()
    }

    async fn request(&self, method: Method, path: String, body: Option<Value>) -> Result<RawResponse> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.send(method, &path, body.as_ref()))
            .await
            .map_err(|err| ClientError::transport(format!("request task failed: {err}")))?
    }

    async fn envelope(&self, method: Method, path: String, body: Option<Value>) -> Result<Envelope> {
        let response = self.request(method, path, body).await?;
        let text = String::from_utf8_lossy(&response.body);
        Envelope::from_http(response.status, &text)?.into_result()
    }

    async fn get(&self, path: String) -> Result<Envelope> {
        self.envelope(Method::Get, path, None).await
    }

    async fn post(&self, path: String, body: Value) -> Result<Envelope> {
        self.envelope(Method::Post, path, Some(body)).await
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| ClientError::Decode(err.to_string()))
}

fn with_cookie<B>(builder: ureq::RequestBuilder<B>, cookie: Option<&str>) -> ureq::RequestBuilder<B> {
    match cookie {
        Some(cookie) => builder.header("Cookie", cookie),
        None => builder,
    }
}

impl HttpInner {
    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<RawResponse> {
        let url = format!("{}{path}", self.base_url);
        let cookie = self.session_cookie.lock().clone();
        let cookie = cookie.as_deref();
        debug!(method = method.as_str(), %url, "request");
        let payload = body
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| ClientError::Decode(err.to_string()))?;

        let result = match method {
            Method::Get => with_cookie(self.agent.get(&url), cookie).call(),
            Method::Delete => with_cookie(self.agent.delete(&url), cookie).call(),
            Method::Post | Method::Put => {
                let builder = if matches!(method, Method::Post) {
                    self.agent.post(&url)
                } else {
                    self.agent.put(&url)
                };
                let builder = with_cookie(builder, cookie);
                match payload {
                    Some(payload) => builder
                        .header("Content-Type", "application/json")
                        .send(payload),
                    None => builder.send_empty(),
                }
            }
        };
        let mut response = result.map_err(ClientError::transport)?;

        self.capture_cookies(&response);
        let status = response.status().as_u16();
        let content_disposition = response
            .headers()
            .get("content-disposition")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .body_mut()
            .with_config()
            .limit(DOWNLOAD_LIMIT_BYTES)
            .read_to_vec()
            .map_err(ClientError::transport)?;
        Ok(RawResponse {
            status,
            content_disposition,
            body,
        })
    }

    fn capture_cookies(&self, response: &ureq::http::Response<ureq::Body>) {
        for value in response.headers().get_all("set-cookie") {
            let Ok(text) = value.to_str() else {
                continue;
            };
            match parse_session_cookie(text, OffsetDateTime::now_utc()) {
                Some(SessionCookie::Set(pair)) => *self.session_cookie.lock() = Some(pair),
                Some(SessionCookie::Cleared) => *self.session_cookie.lock() = None,
                None => {}
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionCookie {
    Set(String),
    Cleared,
}

/// Reads a `Set-Cookie` header for the session cookie.
///
/// `Max-Age` wins over `Expires`; a non-positive age, a past expiry date or
/// an empty value deletes the credential.
fn parse_session_cookie(header: &str, now: OffsetDateTime) -> Option<SessionCookie> {
    let mut parts = header.split(';').map(str::trim);
    let pair = parts.next()?;
    let (name, value) = pair.split_once('=')?;
    if name.trim() != SESSION_COOKIE {
        return None;
    }
    let value = value.trim().trim_matches('"');
    let mut max_age = None;
    let mut expires = None;
    for attr in parts {
        let Some((key, raw)) = attr.split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "max-age" => max_age = raw.parse::<i64>().ok(),
            "expires" => expires = parse_cookie_date(raw),
            _ => {}
        }
    }
    let expired = match (max_age, expires) {
        (Some(age), _) => age <= 0,
        (None, Some(at)) => at <= now,
        (None, None) => false,
    };
    if value.is_empty() || expired {
        Some(SessionCookie::Cleared)
    } else {
        Some(SessionCookie::Set(format!("{SESSION_COOKIE}={value}")))
    }
}

/// `Thu, 01 Jan 1970 00:00:00 GMT`, or the dashed variant some servers send.
fn parse_cookie_date(text: &str) -> Option<OffsetDateTime> {
    let forms: [&[BorrowedFormatItem<'static>]; 2] = [
        format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ),
        format_description!(
            "[weekday repr:short], [day]-[month repr:short]-[year] [hour]:[minute]:[second] GMT"
        ),
    ];
    forms
        .into_iter()
        .find_map(|form| PrimitiveDateTime::parse(text, form).ok())
        .map(PrimitiveDateTime::assume_utc)
}

#[async_trait]
impl SessionApi for HttpApi {
    async fn current_user(&self) -> Result<User> {
        let envelope = self.get("/api/auth/current-user".into()).await?;
        envelope.user()
    }

    async fn login(&self, username: &str, password: &str) -> Result<User> {
        let envelope = self
            .post(
                "/api/auth/login".into(),
                json!({ "username": username, "password": password }),
            )
            .await?;
        envelope.user()
    }

    async fn logout(&self) -> Result<()> {
        let outcome = self
            .envelope(Method::Post, "/api/auth/logout".into(), None)
            .await;
        // the credential is gone client-side whatever the server said
        *self.inner.session_cookie.lock() = None;
        outcome.map(|_| ())
    }

    async fn change_password(&self, old_password: &str, new_password: &str) -> Result<String> {
        let envelope = self
            .post(
                "/api/auth/change-password".into(),
                json!({ "old_password": old_password, "new_password": new_password }),
            )
            .await?;
        Ok(envelope.message_or("password changed"))
    }
}

#[async_trait]
impl DirectoryApi for HttpApi {
    async fn permission_catalog(&self) -> Result<Vec<PermissionInfo>> {
        self.get("/api/permissions".into()).await?.data_or_default()
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        self.get("/api/users".into()).await?.data_or_default()
    }

    async fn get_user(&self, id: i64) -> Result<UserRecord> {
        self.get(format!("/api/users/{id}")).await?.data()
    }

    async fn create_user(&self, user: &NewUser) -> Result<i64> {
        let envelope = self.post("/api/users".into(), to_body(user)?).await?;
        envelope
            .user_id
            .ok_or_else(|| ClientError::Decode("missing user_id".into()))
    }

    async fn update_user(&self, id: i64, update: &UserUpdate) -> Result<String> {
        let envelope = self
            .envelope(Method::Put, format!("/api/users/{id}"), Some(to_body(update)?))
            .await?;
        Ok(envelope.message_or("user updated"))
    }

    async fn delete_user(&self, id: i64) -> Result<String> {
        let envelope = self
            .envelope(Method::Delete, format!("/api/users/{id}"), None)
            .await?;
        Ok(envelope.message_or("user deleted"))
    }

    async fn user_permissions(&self, id: i64) -> Result<PermissionSet> {
        self.get(format!("/api/users/{id}/permissions"))
            .await?
            .data_or_default()
    }

    async fn set_user_permissions(&self, id: i64, permissions: &PermissionSet) -> Result<String> {
        let envelope = self
            .envelope(
                Method::Put,
                format!("/api/users/{id}/permissions"),
                Some(json!({ "permissions": permissions })),
            )
            .await?;
        Ok(envelope.message_or("permissions saved"))
    }

    async fn system_config(&self) -> Result<SystemConfig> {
        self.get("/api/system/config".into()).await?.data()
    }

    async fn set_system_config(&self, config: SystemConfig) -> Result<String> {
        let envelope = self
            .post("/api/system/config".into(), to_body(&config)?)
            .await?;
        Ok(envelope.message_or("system config saved"))
    }
}

#[async_trait]
impl DataApi for HttpApi {
    async fn start_update(&self, request: UpdateRequest) -> Result<JobStart> {
        let envelope = self
            .post("/api/data/update".into(), to_body(&request)?)
            .await?;
        Ok(JobStart {
            already_running: envelope.already_running.unwrap_or(false),
            message: envelope.message,
        })
    }

    async fn update_progress(&self) -> Result<JobProgress> {
        self.get("/api/data/progress".into()).await?.data()
    }

    async fn data_status(&self) -> Result<DataStatus> {
        self.get("/api/data/status".into()).await?.data_or_default()
    }
}

#[async_trait]
impl SearchApi for HttpApi {
    async fn search_stocks(&self, keyword: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let path = format!(
            "/api/stocks/search?keyword={}&limit={limit}",
            urlencoding::encode(keyword)
        );
        self.get(path).await?.data_or_default()
    }
}

#[async_trait]
impl ExportApi for HttpApi {
    async fn export(&self, path: &str, body: &Value) -> Result<RawDownload> {
        let response = self
            .request(Method::Post, path.to_string(), Some(body.clone()))
            .await?;
        if (200..300).contains(&response.status) {
            return Ok(RawDownload {
                content_disposition: response.content_disposition,
                bytes: response.body,
            });
        }
        let text = String::from_utf8_lossy(&response.body);
        let envelope = Envelope::from_http(response.status, &text)?;
        Err(envelope.failure())
    }
}
