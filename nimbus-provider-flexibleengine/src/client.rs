//! Authenticated REST client
//!
//! One pooled `reqwest::Client` shared by every service adapter. Requests
//! carry an IAM token that is fetched lazily, cached until shortly before it
//! expires and refreshed on a 401. Transient failures are retried with
//! exponential backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use nimbus_core::provider::{ErrorKind, ProviderError, ProviderResult};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as Json, json};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::ProviderConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Tokens are refreshed this long before they expire
const TOKEN_EXPIRY_MARGIN: chrono::Duration = chrono::Duration::minutes(5);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method} {url}: HTTP {status}: {message}")]
    Status {
        method: Method,
        url: String,
        status: u16,
        code: Option<String>,
        message: String,
        request_id: Option<String>,
    },

    #[error("{method} {url}: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url}: invalid response body: {source}")]
    Decode {
        method: Method,
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Status {
                status, message, ..
            } => status_kind(*status, message),
            ApiError::Transport { .. } => ErrorKind::Transient,
            ApiError::Decode { .. } => ErrorKind::Internal,
            ApiError::Auth(_) => ErrorKind::Authentication,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ApiError::Status { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        let kind = err.kind();
        let message = match &err {
            ApiError::Status {
                status,
                code,
                message,
                ..
            } => match code {
                Some(code) => format!("HTTP {} ({}): {}", status, code, message),
                None => format!("HTTP {}: {}", status, message),
            },
            other => other.to_string(),
        };
        let request_id = err.request_id().map(str::to_string);
        let mut error = ProviderError::new(message).with_kind(kind);
        if let Some(request_id) = request_id {
            error = error.with_request_id(request_id);
        }
        error.with_cause(err)
    }
}

/// Error kind of an HTTP status
///
/// The vendor reports exhausted quotas as 400 or 403 with a message naming
/// the quota.
pub fn status_kind(status: u16, message: &str) -> ErrorKind {
    let mentions_quota = message.to_ascii_lowercase().contains("quota");
    match status {
        400 | 403 if mentions_quota => ErrorKind::QuotaExceeded,
        400 | 422 => ErrorKind::Validation,
        401 | 403 => ErrorKind::Authentication,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        429 => ErrorKind::RateLimited,
        500 | 502 | 503 | 504 => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

/// Extract `(code, message)` from a vendor error body
///
/// Handles `{"error": {"code", "message"}}`, `{"error_code", "error_msg"}`
/// and the OpenStack style `{"itemNotFound": {"message"}}`.
pub fn parse_error_body(body: &str) -> (Option<String>, String) {
    let Ok(json) = serde_json::from_str::<Json>(body) else {
        let text = body.trim();
        return (None, if text.is_empty() { "no details".to_string() } else { text.to_string() });
    };
    let text = |v: Option<&Json>| v.and_then(Json::as_str).map(str::to_string);

    if let Some(error) = json.get("error").filter(|e| e.is_object()) {
        let code = text(error.get("code")).or_else(|| text(error.get("error_code")));
        let message = text(error.get("message"))
            .or_else(|| text(error.get("error_msg")))
            .unwrap_or_else(|| error.to_string());
        return (code, message);
    }
    if json.get("error_msg").is_some() || json.get("error_code").is_some() {
        return (
            text(json.get("error_code")),
            text(json.get("error_msg")).unwrap_or_default(),
        );
    }
    if let Some(obj) = json.as_object()
        && obj.len() == 1
        && let Some((name, inner)) = obj.iter().next()
        && let Some(message) = text(inner.get("message"))
    {
        return (Some(name.clone()), message);
    }
    (None, json.to_string())
}

/// Delay before retry `attempt` (0-based)
pub fn backoff(attempt: u32) -> Duration {
    let delay = Duration::from_millis(500).saturating_mul(2u32.saturating_pow(attempt));
    delay.min(MAX_BACKOFF)
}

fn request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    ["X-Request-Id", "X-Openstack-Request-Id", "X-Compute-Request-Id"]
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
struct Token {
    value: String,
    project_id: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + TOKEN_EXPIRY_MARGIN < expires_at,
            None => true,
        }
    }
}

/// HTTP client bound to one region and project
pub struct RestClient {
    http: reqwest::Client,
    config: ProviderConfig,
    token: RwLock<Option<Token>>,
}

impl RestClient {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure)
            .user_agent(concat!("nimbus/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::new("failed to build HTTP client").with_cause(e))?;
        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn token(&self) -> Result<Token, ApiError> {
        if let Some(token) = self.token.read().await.as_ref()
            && token.is_fresh()
        {
            return Ok(token.clone());
        }
        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref()
            && token.is_fresh()
        {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_token(&self) {
        self.token.write().await.take();
    }

    async fn authenticate(&self) -> Result<Token, ApiError> {
        if let Some(value) = &self.config.token {
            let project_id = self
                .config
                .project_id
                .clone()
                .ok_or_else(|| ApiError::Auth("project_id is required with a token".to_string()))?;
            return Ok(Token {
                value: value.clone(),
                project_id,
                expires_at: None,
            });
        }

        let url = format!("{}/auth/tokens", self.config.auth_url());
        let domain = json!({ "name": self.config.domain_name });
        let scope = match (&self.config.project_id, &self.config.project_name) {
            (Some(id), _) => json!({ "project": { "id": id } }),
            (None, name) => json!({ "project": { "name": name, "domain": domain } }),
        };
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.user_name,
                            "password": self.config.password,
                            "domain": domain,
                        }
                    }
                },
                "scope": scope,
            }
        });

        log::debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                method: Method::POST,
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        let value = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(|source| ApiError::Transport {
            method: Method::POST,
            url: url.clone(),
            source,
        })?;
        if !status.is_success() {
            let (_, message) = parse_error_body(&text);
            return Err(ApiError::Auth(format!("HTTP {}: {}", status.as_u16(), message)));
        }
        let value =
            value.ok_or_else(|| ApiError::Auth("no X-Subject-Token in response".to_string()))?;

        let body: Json = serde_json::from_str(&text).map_err(|source| ApiError::Decode {
            method: Method::POST,
            url: url.clone(),
            source,
        })?;
        let token = &body["token"];
        let expires_at = token["expires_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        let project_id = token["project"]["id"]
            .as_str()
            .map(str::to_string)
            .or_else(|| self.config.project_id.clone())
            .ok_or_else(|| ApiError::Auth("token is not scoped to a project".to_string()))?;

        log::info!("authenticated against {} for project {}", self.config.region, project_id);
        Ok(Token {
            value,
            project_id,
            expires_at,
        })
    }

    /// Project id the client is scoped to
    pub async fn project_id(&self) -> ProviderResult<String> {
        Ok(self.token().await?.project_id)
    }

    /// Send a request, retrying transient failures; returns the JSON body (`Null` when empty)
    pub async fn request(
        &self,
        method: Method,
        service: &str,
        path: &str,
        body: Option<&Json>,
    ) -> ProviderResult<Json> {
        let max_retries = self.config.max_retries();
        let mut reauthenticated = false;
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), service, path, body).await {
                Ok(json) => return Ok(json),
                Err(e)
                    if e.is_unauthorized() && !reauthenticated && self.config.token.is_none() =>
                {
                    log::warn!("{} {}: token rejected, re-authenticating", method, path);
                    self.invalidate_token().await;
                    reauthenticated = true;
                }
                Err(e) if e.kind().is_retryable() && attempt < max_retries => {
                    let delay = backoff(attempt);
                    log::warn!("{} (retry {}/{} in {:?})", e, attempt + 1, max_retries, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        service: &str,
        path: &str,
        body: Option<&Json>,
    ) -> Result<Json, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}{}",
            self.config.endpoint(service),
            path.replace("{project_id}", &token.project_id)
        );
        log::debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("X-Auth-Token", &token.value)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|source| ApiError::Transport {
            method: method.clone(),
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        let request_id = request_id(response.headers());
        let text = response.text().await.map_err(|source| ApiError::Transport {
            method: method.clone(),
            url: url.clone(),
            source,
        })?;

        if !status.is_success() {
            let (code, message) = parse_error_body(&text);
            return Err(ApiError::Status {
                method,
                url,
                status: status.as_u16(),
                code,
                message,
                request_id,
            });
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(Json::Null);
        }
        serde_json::from_str(&text).map_err(|source| ApiError::Decode { method, url, source })
    }

    pub async fn get(&self, service: &str, path: &str) -> ProviderResult<Json> {
        self.request(Method::GET, service, path, None).await
    }

    pub async fn post(&self, service: &str, path: &str, body: Json) -> ProviderResult<Json> {
        self.request(Method::POST, service, path, Some(&body)).await
    }

    pub async fn put(&self, service: &str, path: &str, body: Json) -> ProviderResult<Json> {
        self.request(Method::PUT, service, path, Some(&body)).await
    }

    pub async fn delete(&self, service: &str, path: &str) -> ProviderResult<()> {
        self.request(Method::DELETE, service, path, None).await.map(|_| ())
    }
}

/// Deserialize the object under `key` of a response envelope
pub fn field<T: DeserializeOwned>(mut body: Json, key: &str) -> ProviderResult<T> {
    let value = body
        .get_mut(key)
        .map(Json::take)
        .ok_or_else(|| ProviderError::new(format!("response has no '{}' field", key)))?;
    serde_json::from_value(value)
        .map_err(|e| {
            ProviderError::new(format!("invalid '{}' in response: {}", key, e)).with_cause(e)
        })
}

/// Deserialize a whole response body
pub fn decode<T: DeserializeOwned>(body: Json, what: &str) -> ProviderResult<T> {
    serde_json::from_value(body)
        .map_err(|e| {
            ProviderError::new(format!("invalid {} in response: {}", what, e)).with_cause(e)
        })
}

/// Serialize a request body
pub fn encode<T: Serialize>(value: &T) -> ProviderResult<Json> {
    serde_json::to_value(value)
        .map_err(|e| ProviderError::new(format!("cannot encode request: {}", e)).with_cause(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bodies_in_every_vendor_dialect() {
        assert_eq!(
            parse_error_body(r#"{"error": {"code": "WAF.00014002", "message": "resource not found"}}"#),
            (Some("WAF.00014002".to_string()), "resource not found".to_string())
        );
        assert_eq!(
            parse_error_body(r#"{"error_code": "ER.00000001", "error_msg": "bad asn"}"#),
            (Some("ER.00000001".to_string()), "bad asn".to_string())
        );
        assert_eq!(
            parse_error_body(r#"{"itemNotFound": {"code": 404, "message": "Instance could not be found"}}"#),
            (
                Some("itemNotFound".to_string()),
                "Instance could not be found".to_string()
            )
        );
        assert_eq!(parse_error_body("Bad Gateway"), (None, "Bad Gateway".to_string()));
        assert_eq!(parse_error_body(""), (None, "no details".to_string()));
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        assert_eq!(status_kind(404, "gone"), ErrorKind::NotFound);
        assert_eq!(status_kind(409, "busy"), ErrorKind::Conflict);
        assert_eq!(status_kind(429, ""), ErrorKind::RateLimited);
        assert_eq!(status_kind(503, ""), ErrorKind::Transient);
        assert_eq!(status_kind(400, "invalid cidr"), ErrorKind::Validation);
        assert_eq!(
            status_kind(403, "Quota exceeded for cores"),
            ErrorKind::QuotaExceeded
        );
        assert_eq!(status_kind(403, "forbidden"), ErrorKind::Authentication);
        assert_eq!(status_kind(418, ""), ErrorKind::Internal);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(10), MAX_BACKOFF);
        assert_eq!(backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn status_error_converts_with_request_id() {
        let err = ApiError::Status {
            method: Method::GET,
            url: "https://ecs/servers/x".to_string(),
            status: 404,
            code: Some("itemNotFound".to_string()),
            message: "Instance could not be found".to_string(),
            request_id: Some("req-1".to_string()),
        };
        let err: ProviderError = err.into();
        assert!(err.is_not_found());
        assert_eq!(err.request_id.as_deref(), Some("req-1"));
        assert!(err.message.contains("itemNotFound"));
    }

    #[test]
    fn field_unwraps_envelopes() {
        #[derive(serde::Deserialize)]
        struct Vpc {
            id: String,
        }
        let vpc: Vpc = field(json!({"vpc": {"id": "v-1"}}), "vpc").unwrap();
        assert_eq!(vpc.id, "v-1");
        assert!(field::<Vpc>(json!({"subnet": {}}), "vpc").is_err());
    }
}
