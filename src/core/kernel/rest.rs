use crate::core::config::RetryPolicy;
use crate::core::errors::ExchangeError;
use crate::core::kernel::rate_limit::RateGate;
use crate::core::kernel::signer::{Nonce, Signer};
use crate::core::kernel::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

/// How much authentication an endpoint needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAuth {
    /// No key, no signature
    Public,
    /// API key header only (user-data stream endpoints)
    ApiKey,
    /// API key header plus `timestamp` and `signature` parameters
    Signed,
}

/// REST client trait for making HTTP requests
///
/// `execute` is the single transport-level entry point: it applies the
/// rate gate, signing and the 429 retry loop, and hands back whatever
/// response the server sent last. The typed helpers turn that response
/// into a value or an [`ExchangeError`].
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Send a request, retrying while the server answers 429.
    ///
    /// # Arguments
    /// * `method` - HTTP method; POST sends parameters as a form body, every other verb as a query string
    /// * `endpoint` - API endpoint path
    /// * `params` - Parameters in the order they are signed and sent
    /// * `auth` - Authentication level
    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        auth: RequestAuth,
    ) -> Result<HttpResponse, ExchangeError>;

    /// Attempt ceiling used by `execute`, reported in rate-limit errors.
    fn max_attempts(&self) -> u32;

    /// Send a request and deserialize a successful response body.
    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        auth: RequestAuth,
    ) -> Result<T, ExchangeError> {
        let response = self.execute(method, endpoint, params, auth).await?;
        decode_response(response, self.max_attempts())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        auth: RequestAuth,
    ) -> Result<T, ExchangeError> {
        self.request_json(Method::GET, endpoint, params, auth).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        auth: RequestAuth,
    ) -> Result<T, ExchangeError> {
        self.request_json(Method::POST, endpoint, params, auth).await
    }

    async fn put_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        auth: RequestAuth,
    ) -> Result<T, ExchangeError> {
        self.request_json(Method::PUT, endpoint, params, auth).await
    }

    async fn delete_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        auth: RequestAuth,
    ) -> Result<T, ExchangeError> {
        self.request_json(Method::DELETE, endpoint, params, auth).await
    }
}

/// Map a final response onto a typed value or a typed error.
pub fn decode_response<T: DeserializeOwned>(
    response: HttpResponse,
    attempts: u32,
) -> Result<T, ExchangeError> {
    if response.is_rate_limited() {
        return Err(ExchangeError::RateLimitExceeded {
            attempts,
            body: response.body,
        });
    }
    if !response.is_success() {
        return Err(ExchangeError::api(response.status, response.body));
    }
    serde_json::from_str(&response.body).map_err(|e| {
        ExchangeError::DeserializationError(format!(
            "Failed to parse JSON response: {} - {}",
            e, response.body
        ))
    })
}

/// Delays slept between attempts: `step * 1`, `step * 2`, ... one fewer than
/// the attempt ceiling.
pub fn backoff_schedule(policy: RetryPolicy) -> Vec<Duration> {
    (1..policy.max_attempts.max(1))
        .map(|attempt| policy.backoff_step * attempt)
        .collect()
}

/// Canonical `k=v&k=v` form of a parameter list, order preserved.
pub fn canonical_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    pub retry: RetryPolicy,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    transport: Option<Arc<dyn HttpTransport>>,
    gate: Option<Arc<RateGate>>,
    nonce: Option<Arc<Nonce>>,
    cancel: Option<CancellationToken>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
            transport: None,
            gate: None,
            nonce: None,
            cancel: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the reqwest transport, e.g. with a scripted one in tests
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_nonce(mut self, nonce: Arc<Nonce>) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Token whose cancellation aborts in-flight retry waits
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<RateLimitedRest, ExchangeError> {
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_timeout(
                self.config.base_url.clone(),
                Duration::from_secs(self.config.timeout_seconds),
            )?),
        };

        Ok(RateLimitedRest {
            transport,
            signer: self.signer,
            gate: self.gate.unwrap_or_else(|| Arc::new(RateGate::rest_default())),
            nonce: self.nonce.unwrap_or_default(),
            cancel: self.cancel.unwrap_or_default(),
            config: self.config,
        })
    }
}

/// Rate-limited, signing, retrying REST client over any [`HttpTransport`].
#[derive(Clone)]
pub struct RateLimitedRest {
    transport: Arc<dyn HttpTransport>,
    signer: Option<Arc<dyn Signer>>,
    gate: Arc<RateGate>,
    nonce: Arc<Nonce>,
    cancel: CancellationToken,
    config: RestClientConfig,
}

impl std::fmt::Debug for RateLimitedRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

/// Outcome of one attempt inside the retry loop.
enum AttemptError {
    Throttled(HttpResponse),
    Failed(ExchangeError),
}

impl RateLimitedRest {
    pub fn nonce(&self) -> &Arc<Nonce> {
        &self.nonce
    }

    pub fn exchange_name(&self) -> &str {
        &self.config.exchange_name
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Build the wire request. Signed requests get a fresh timestamp and
    /// signature every time this is called.
    fn prepare(
        &self,
        method: &Method,
        endpoint: &str,
        canonical: &str,
        auth: RequestAuth,
    ) -> Result<HttpRequest, ExchangeError> {
        let mut request = HttpRequest::new(method.clone(), endpoint);
        let mut payload = canonical.to_string();

        if auth != RequestAuth::Public {
            let signer = self.signer.as_ref().ok_or_else(|| {
                ExchangeError::AuthError(
                    "Authentication required but no signer provided".to_string(),
                )
            })?;

            if auth == RequestAuth::Signed {
                let (headers, appended) = signer.sign_request(&payload, self.nonce.next())?;
                for (key, value) in appended {
                    if !payload.is_empty() {
                        payload.push('&');
                    }
                    payload.push_str(&key);
                    payload.push('=');
                    payload.push_str(&value);
                }
                request.headers = headers;
            } else {
                request.headers = signer.api_key_headers();
            }
        }

        if *method == Method::POST {
            if !payload.is_empty() {
                request.body = Some(payload);
            }
        } else {
            request.query = payload;
        }
        Ok(request)
    }

    async fn attempt(
        &self,
        method: &Method,
        endpoint: &str,
        canonical: &str,
        auth: RequestAuth,
        attempt: u32,
    ) -> Result<HttpResponse, AttemptError> {
        self.gate.acquire().await;
        let request = self
            .prepare(method, endpoint, canonical, auth)
            .map_err(AttemptError::Failed)?;
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(AttemptError::Failed)?;

        if response.is_rate_limited() {
            warn!(
                exchange = %self.config.exchange_name,
                endpoint,
                attempt,
                max_attempts = self.config.retry.max_attempts,
                "rate limited by server"
            );
            return Err(AttemptError::Throttled(response));
        }
        trace!(status = response.status, "request completed");
        Ok(response)
    }
}

#[async_trait]
impl RestClient for RateLimitedRest {
    #[instrument(skip(self, params), fields(exchange = %self.config.exchange_name, method = %method, endpoint = %endpoint))]
    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        auth: RequestAuth,
    ) -> Result<HttpResponse, ExchangeError> {
        let canonical = canonical_query(params);
        let canonical = canonical.as_str();
        let method = &method;
        let counter = AtomicU32::new(0);
        let counter = &counter;

        let retry = RetryIf::spawn(
            backoff_schedule(self.config.retry),
            || async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                self.attempt(method, endpoint, canonical, auth, attempt).await
            },
            |e: &AttemptError| matches!(e, AttemptError::Throttled(_)),
        );

        tokio::select! {
            () = self.cancel.cancelled() => Err(ExchangeError::Cancelled),
            result = retry => match result {
                Ok(response) | Err(AttemptError::Throttled(response)) => Ok(response),
                Err(AttemptError::Failed(e)) => Err(e),
            },
        }
    }

    fn max_attempts(&self) -> u32 {
        self.config.retry.max_attempts
    }
}
