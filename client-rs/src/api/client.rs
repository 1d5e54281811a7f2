//! Authenticated request client

use crate::api::envelope::{Envelope, LoginData, RefreshData};
use crate::api::renewal::{RenewalCoordinator, Renewer};
use crate::api::transport::{reason_phrase, HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
use crate::config::ClientConfig;
use crate::credential::{Credential, CredentialStore, Session};
use crate::error::{ApiError, ApiResult};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const LOGIN_ENDPOINT: &str = "auth/login";
const LOGOUT_ENDPOINT: &str = "auth/logout";
const REFRESH_ENDPOINT: &str = "auth/refresh";

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn put(body: Value) -> Self {
        Self {
            method: Method::Put,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn delete() -> Self {
        Self {
            method: Method::Delete,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

struct ApiInner {
    config: ClientConfig,
    http: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    renewal: RenewalCoordinator,
}

/// Request client for the monitoring API.
///
/// Every call returns an [`ApiResult`]; expected failures (no credential,
/// timeouts, rejected credentials, error statuses) never panic. This struct
/// is cheaply cloneable as it uses an internal Arc.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiInner>,
}

impl ApiClient {
    /// Create a client using the default `reqwest` transport
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> ApiResult<Self> {
        let http = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(config, store, http))
    }

    /// Create a client on top of a custom transport
    pub fn with_transport(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        http: Arc<dyn HttpTransport>,
    ) -> Self {
        let renewer = Arc::new(RefreshEndpoint {
            http: http.clone(),
            url: join_endpoint(&config.api_url, REFRESH_ENDPOINT),
            timeout: config.request_timeout,
        });
        let renewal = RenewalCoordinator::new(store.clone(), renewer);

        Self {
            inner: Arc::new(ApiInner {
                config,
                http,
                store,
                renewal,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Identity decoded from the stored credential
    pub fn session(&self) -> Option<Session> {
        self.inner.store.get().and_then(|c| c.session())
    }

    /// Whether a non-expired credential is stored
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.get().is_some_and(|c| !c.is_expired())
    }

    /// Issue a call and return the response envelope as sent by the server.
    ///
    /// `endpoint` is relative to the API base URL unless it is an absolute
    /// `http(s)://` URL. With `requires_auth`, the stored credential is
    /// attached as a bearer token, renewing it first when expired.
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
        requires_auth: bool,
    ) -> ApiResult<Envelope<T>> {
        let mut headers = options.headers;
        if requires_auth {
            let credential = self.authorized_credential().await?;
            headers.push(("Authorization".to_string(), credential.bearer()));
        }

        let url = build_url(&self.inner.config.api_url, endpoint, &options.query)?;
        let request = HttpRequest {
            method: options.method,
            url,
            headers,
            body: options.body,
        };

        let response = self.execute(request).await?;
        self.interpret(response)
    }

    /// Authenticated GET
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<Envelope<T>> {
        self.call(endpoint, RequestOptions::get(), true).await
    }

    /// Authenticated POST with a JSON body
    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Value,
    ) -> ApiResult<Envelope<T>> {
        self.call(endpoint, RequestOptions::post(body), true).await
    }

    /// Log in and store the returned credential.
    ///
    /// When the primary path fails with a gateway-class error the login is
    /// retried once against the origin-relative fallback path.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<LoginData> {
        let body = serde_json::json!({ "username": username, "password": password });

        let envelope = match self
            .call::<LoginData>(LOGIN_ENDPOINT, RequestOptions::post(body.clone()), false)
            .await
        {
            Err(e) if e.is_gateway() => {
                let primary = join_endpoint(&self.inner.config.api_url, LOGIN_ENDPOINT);
                let fallback = self.fallback_login_url()?;
                if fallback == primary {
                    return Err(e);
                }
                warn!(error = %e, url = %fallback, "Login failed on primary path, retrying via fallback");
                self.call::<LoginData>(&fallback, RequestOptions::post(body), false)
                    .await?
            }
            other => other?,
        };

        let data = envelope.into_result()?;
        self.inner
            .store
            .set(Credential::new(data.token.clone()))
            .map_err(|e| {
                warn!(error = %e, "Failed to persist credential after login");
                ApiError::from(e)
            })?;
        info!("Logged in");
        Ok(data)
    }

    /// Tell the server the session is over and forget the credential.
    ///
    /// The store is cleared even when the server cannot be reached.
    pub async fn logout(&self) -> ApiResult<()> {
        if let Some(credential) = self.inner.store.get() {
            let options = RequestOptions::post(Value::Object(Default::default()))
                .header("Authorization", credential.bearer());
            if let Err(e) = self.call::<Value>(LOGOUT_ENDPOINT, options, false).await {
                debug!(error = %e, "Logout request failed");
            }
        }

        self.purge("logout");
        Ok(())
    }

    /// Renew the stored credential now, joining any renewal in flight
    pub async fn refresh(&self) -> Option<Credential> {
        self.inner.renewal.refresh().await
    }

    async fn authorized_credential(&self) -> ApiResult<Credential> {
        let Some(credential) = self.inner.store.get() else {
            return Err(ApiError::AuthenticationRequired);
        };

        if !credential.is_expired() {
            return Ok(credential);
        }

        debug!("Stored credential expired, renewing before call");
        match self.inner.renewal.refresh().await {
            Some(renewed) => Ok(renewed),
            None => {
                self.purge("renewal failed");
                Err(ApiError::AuthenticationRequired)
            }
        }
    }

    async fn execute(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        let url = request.url.clone();
        let timeout = self.inner.config.request_timeout;

        // dropping the transport future cancels the in-flight request
        match tokio::time::timeout(timeout, self.inner.http.execute(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%url, ?timeout, "Request timed out");
                Err(ApiError::Timeout)
            }
        }
    }

    fn interpret<T: DeserializeOwned>(&self, response: HttpResponse) -> ApiResult<Envelope<T>> {
        if response.status == 401 {
            self.purge("server rejected credential");
            return Err(ApiError::AuthenticationFailed);
        }

        if !response.is_success() {
            let message = serde_json::from_slice::<Envelope<Value>>(&response.body)
                .ok()
                .and_then(|e| e.failure_text().map(str::to_string))
                .unwrap_or_else(|| reason_phrase(response.status).to_string());
            return Err(ApiError::Status {
                status: response.status,
                message,
            });
        }

        serde_json::from_slice(&response.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn purge(&self, reason: &str) {
        info!(reason, "Clearing stored credential");
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear credential store");
        }
    }

    fn fallback_login_url(&self) -> ApiResult<String> {
        let base = Url::parse(&self.inner.config.api_url)
            .map_err(|e| ApiError::InvalidRequest(format!("api url: {}", e)))?;
        base.join(&self.inner.config.login_fallback_path)
            .map(|u| u.to_string())
            .map_err(|e| ApiError::InvalidRequest(format!("login fallback path: {}", e)))
    }
}

/// Calls `auth/refresh` with the current credential as bearer
struct RefreshEndpoint {
    http: Arc<dyn HttpTransport>,
    url: String,
    timeout: Duration,
}

#[async_trait]
impl Renewer for RefreshEndpoint {
    async fn renew(&self, current: &Credential) -> Option<Credential> {
        let request = HttpRequest {
            method: Method::Post,
            url: self.url.clone(),
            headers: vec![("Authorization".to_string(), current.bearer())],
            body: None,
        };

        let response = match tokio::time::timeout(self.timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Renewal request failed");
                return None;
            }
            Err(_) => {
                warn!("Renewal request timed out");
                return None;
            }
        };

        if !response.is_success() {
            warn!(status = response.status, "Renewal rejected");
            return None;
        }

        match serde_json::from_slice::<Envelope<RefreshData>>(&response.body) {
            Ok(envelope) => match envelope.into_result() {
                Ok(data) => Some(Credential::new(data.token)),
                Err(e) => {
                    warn!(error = %e, "Renewal unsuccessful");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Renewal response malformed");
                None
            }
        }
    }
}

fn is_absolute(endpoint: &str) -> bool {
    endpoint.starts_with("http://") || endpoint.starts_with("https://")
}

/// `base` + `/` + `endpoint`, tolerating slashes on either side
fn join_endpoint(base: &str, endpoint: &str) -> String {
    if is_absolute(endpoint) {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

fn build_url(base: &str, endpoint: &str, query: &[(String, String)]) -> ApiResult<String> {
    let joined = join_endpoint(base, endpoint);
    let mut url = Url::parse(&joined)
        .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", joined, e)))?;
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url.to_string())
}
