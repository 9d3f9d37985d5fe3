/// Kernel - transport layer shared by every market variant
///
/// Nothing in here knows about Binance payloads; it moves bytes, signs
/// them and paces them.
///
/// ## Transport Layer
/// - `HttpTransport`: one request in, one raw response out (`ReqwestTransport` in production)
/// - `RestClient`: rate gate, signing and 429 retry on top of a transport
/// - `WsSession`: WebSocket connection with ping handling and codec-driven decoding
///
/// ## Authentication
/// - `Signer` / `HmacSigner`: HMAC-SHA256 query signing
/// - `Nonce`: monotonic, server-offset timestamps
///
/// ## Pacing
/// - `RateGate`: governor token bucket, one per outbound channel
///
/// # Example
/// ```rust,no_run
/// use binance_brokerage::core::kernel::*;
/// use secrecy::Secret;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), binance_brokerage::core::errors::ExchangeError> {
/// let signer = Arc::new(HmacSigner::new(
///     Secret::new("api_key".to_string()),
///     Secret::new("secret_key".to_string()),
/// ));
/// let rest = RestClientBuilder::new(RestClientConfig::new(
///     "https://api.binance.com".to_string(),
///     "binance".to_string(),
/// ))
/// .with_signer(signer)
/// .build()?;
///
/// let time: serde_json::Value = rest.get_json("/api/v3/time", &[], RequestAuth::Public).await?;
/// # let _ = time;
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod rate_limit;
pub mod rest;
pub mod signer;
pub mod transport;
pub mod ws;

pub use codec::WsCodec;
pub use rate_limit::RateGate;
pub use rest::{
    backoff_schedule, RateLimitedRest, RequestAuth, RestClient, RestClientBuilder,
    RestClientConfig,
};
pub use signer::{HmacSigner, Nonce, SignatureResult, Signer, API_KEY_HEADER};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use ws::{TungsteniteWs, WsSession};
