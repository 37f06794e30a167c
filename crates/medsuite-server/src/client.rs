//! HTTP client for calls to sibling services.
//!
//! Every request carries `Content-Type: application/json`, `X-Service-Name`
//! and a bearer token: the caller's when one is forwarded, otherwise a
//! short-lived token signed with the shared secret for the service's own
//! identity. Connection failures and 5xx responses are retried with a fixed
//! delay; any other status is final.
//!
//! | status        | result                         |
//! |---------------|--------------------------------|
//! | 2xx           | `Ok(Some(body))`, `{}` if empty |
//! | 404           | `Ok(None)`                     |
//! | 5xx           | retried, then `Transient`      |
//! | anything else | `Permanent { status, body }`   |

use std::collections::HashMap;
use std::time::Duration;

use medsuite_auth::Identity;
use medsuite_auth::token::{JwtService, TokenClaims};
use medsuite_notifications::NotificationError;
use reqwest::{Method, StatusCode, header};
use serde_json::{Value, json};
use tokio::time::sleep;

use crate::config::ServicesConfig;

pub const SERVICE_NAME_HEADER: &str = "x-service-name";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network failure or 5xx, after the last attempt.
    #[error("transient failure calling {service}: {message}")]
    Transient { service: String, message: String },

    #[error("{service} answered {status}: {body}")]
    Permanent {
        service: String,
        status: u16,
        body: String,
    },

    /// The request could not be built or the response was not JSON.
    #[error("malformed exchange with {service}: {message}")]
    Malformed { service: String, message: String },

    #[error("client configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Status code for `Permanent` failures.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Permanent { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ClientError> for NotificationError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::InvalidConfig(msg) => NotificationError::InvalidConfig(msg),
            other => NotificationError::Source(other.to_string()),
        }
    }
}

/// Outcome of a single attempt.
enum Attempt {
    Done(Result<Option<Value>, ClientError>),
    Retry(String),
}

/// Signs tokens for calls made on the service's own behalf.
#[derive(Clone)]
struct ServiceCredentials {
    jwt: JwtService,
    identity: Identity,
    lifetime: time::Duration,
}

impl ServiceCredentials {
    fn mint(&self) -> Result<String, ClientError> {
        let claims = TokenClaims::for_identity(&self.identity, self.lifetime);
        self.jwt
            .encode(&claims)
            .map_err(|e| ClientError::InvalidConfig(format!("cannot sign service token: {e}")))
    }
}

#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    service_name: String,
    gateway_url: Option<String>,
    urls: HashMap<String, String>,
    max_attempts: u32,
    retry_delay: Duration,
    credentials: Option<ServiceCredentials>,
}

impl ServiceClient {
    /// Builds a client identifying itself as `service_name`.
    pub fn new(
        service_name: impl Into<String>,
        config: &ServicesConfig,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            service_name: service_name.into(),
            gateway_url: config.gateway_url.clone(),
            urls: config
                .urls
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            credentials: None,
        })
    }

    /// Signs a token for `identity` whenever a call forwards no bearer.
    #[must_use]
    pub fn with_service_credentials(
        mut self,
        jwt: JwtService,
        identity: Identity,
        lifetime: Duration,
    ) -> Self {
        let lifetime = time::Duration::try_from(lifetime).unwrap_or(time::Duration::minutes(5));
        self.credentials = Some(ServiceCredentials {
            jwt,
            identity,
            lifetime,
        });
        self
    }

    /// Direct URL for `service` when configured, the gateway otherwise.
    pub fn base_url(&self, service: &str) -> Result<&str, ClientError> {
        self.urls
            .get(&service.to_ascii_lowercase())
            .or(self.gateway_url.as_ref())
            .map(|s| s.trim_end_matches('/'))
            .ok_or_else(|| {
                ClientError::InvalidConfig(format!(
                    "no URL configured for service '{service}' and no gateway_url"
                ))
            })
    }

    pub async fn get(
        &self,
        service: &str,
        path: &str,
        bearer: Option<&str>,
    ) -> Result<Option<Value>, ClientError> {
        self.request(Method::GET, service, path, None, bearer).await
    }

    pub async fn post(
        &self,
        service: &str,
        path: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Option<Value>, ClientError> {
        self.request(Method::POST, service, path, Some(body), bearer)
            .await
    }

    pub async fn put(
        &self,
        service: &str,
        path: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Option<Value>, ClientError> {
        self.request(Method::PUT, service, path, Some(body), bearer)
            .await
    }

    pub async fn patch(
        &self,
        service: &str,
        path: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Option<Value>, ClientError> {
        self.request(Method::PATCH, service, path, Some(body), bearer)
            .await
    }

    pub async fn delete(
        &self,
        service: &str,
        path: &str,
        bearer: Option<&str>,
    ) -> Result<Option<Value>, ClientError> {
        self.request(Method::DELETE, service, path, None, bearer)
            .await
    }

    /// Like [`Self::request`] but any failure becomes `None` (logged).
    pub async fn request_soft(
        &self,
        method: Method,
        service: &str,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Option<Value> {
        match self.request(method.clone(), service, path, body, bearer).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%method, service, path, error = %e, "Service call failed");
                None
            }
        }
    }

    /// Sends one logical request, retrying transient failures.
    pub async fn request(
        &self,
        method: Method,
        service: &str,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<Option<Value>, ClientError> {
        let url = format!(
            "{}/{}",
            self.base_url(service)?,
            path.trim_start_matches('/')
        );
        let minted = match (bearer, &self.credentials) {
            (None, Some(credentials)) => Some(credentials.mint()?),
            _ => None,
        };
        let bearer = bearer.or(minted.as_deref());
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match self
                .attempt(method.clone(), service, &url, body, bearer)
                .await
            {
                Attempt::Done(result) => return result,
                Attempt::Retry(message) => {
                    tracing::debug!(
                        service,
                        %url,
                        attempt,
                        error = %message,
                        "Retrying service call"
                    );
                    last_error = Some(message);
                }
            }
            if attempt < self.max_attempts {
                sleep(self.retry_delay).await;
            }
        }

        Err(ClientError::Transient {
            service: service.to_string(),
            message: last_error.unwrap_or_else(|| {
                format!("failed after {} attempts", self.max_attempts)
            }),
        })
    }

    async fn attempt(
        &self,
        method: Method,
        service: &str,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Attempt {
        let mut request = self
            .http
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(SERVICE_NAME_HEADER, &self.service_name);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_builder() => {
                return Attempt::Done(Err(ClientError::Malformed {
                    service: service.to_string(),
                    message: e.to_string(),
                }));
            }
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Attempt::Done(Ok(None));
        }
        if status.is_server_error() {
            return Attempt::Retry(format!("status {status}"));
        }

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Attempt::Retry(format!("reading body: {e}")),
        };

        if !status.is_success() {
            return Attempt::Done(Err(ClientError::Permanent {
                service: service.to_string(),
                status: status.as_u16(),
                body: text,
            }));
        }

        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Attempt::Done(Ok(Some(json!({}))));
        }

        Attempt::Done(
            serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| ClientError::Malformed {
                    service: service.to_string(),
                    message: format!("invalid JSON body: {e}"),
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: ServicesConfig) -> ServiceClient {
        ServiceClient::new("notifications", &config).unwrap()
    }

    #[test]
    fn test_base_url_prefers_direct_url() {
        let mut config = ServicesConfig {
            gateway_url: Some("http://gateway:8000/".into()),
            ..ServicesConfig::default()
        };
        config
            .urls
            .insert("Users".into(), "http://users:8001/".into());
        let client = client(config);

        assert_eq!(client.base_url("USERS").unwrap(), "http://users:8001");
        assert_eq!(client.base_url("BILLING").unwrap(), "http://gateway:8000");
    }

    #[test]
    fn test_base_url_missing() {
        let err = client(ServicesConfig::default())
            .base_url("PHARMACY")
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[test]
    fn test_error_mapping() {
        let err = ClientError::Permanent {
            service: "USERS".into(),
            status: 403,
            body: "{}".into(),
        };
        assert_eq!(err.status(), Some(403));
        assert!(!err.is_transient());
        assert!(matches!(
            NotificationError::from(err),
            NotificationError::Source(_)
        ));
    }
}
