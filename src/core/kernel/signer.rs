use crate::core::errors::ExchangeError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Result type for signing operations: (headers, params to append)
pub type SignatureResult = Result<(HashMap<String, String>, Vec<(String, String)>), ExchangeError>;

/// Header carrying the API key on every authenticated request.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Signer trait for request authentication
///
/// Implementations receive the canonical parameter string that will be
/// sent (query string for GET/PUT/DELETE, form body for POST) and return
/// the headers to attach plus the parameters to append after it.
pub trait Signer: Send + Sync {
    /// Sign a request
    ///
    /// # Arguments
    /// * `payload` - Canonical `k=v&k=v` parameter string (may be empty)
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(&self, payload: &str, timestamp: u64) -> SignatureResult;

    /// Headers for endpoints that need the API key but no signature.
    fn api_key_headers(&self) -> HashMap<String, String>;
}

/// HMAC-SHA256 signer with hex output.
pub struct HmacSigner {
    api_key: Secret<String>,
    secret_key: Secret<String>,
    recv_window_ms: Option<u64>,
}

impl HmacSigner {
    pub fn new(api_key: Secret<String>, secret_key: Secret<String>) -> Self {
        Self {
            api_key,
            secret_key,
            recv_window_ms: None,
        }
    }

    /// Append `recvWindow` to every signed request.
    #[must_use]
    pub fn with_recv_window(mut self, recv_window_ms: Option<u64>) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    /// Hex-encoded HMAC-SHA256 of `payload`.
    pub fn signature(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;

        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("recv_window_ms", &self.recv_window_ms)
            .finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn sign_request(&self, payload: &str, timestamp: u64) -> SignatureResult {
        let mut appended = Vec::with_capacity(3);
        if let Some(window) = self.recv_window_ms {
            appended.push(("recvWindow".to_string(), window.to_string()));
        }
        appended.push(("timestamp".to_string(), timestamp.to_string()));

        let suffix = appended
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signed_payload = if payload.is_empty() {
            suffix
        } else {
            format!("{}&{}", payload, suffix)
        };

        let signature = self.signature(&signed_payload)?;
        appended.push(("signature".to_string(), signature));

        Ok((self.api_key_headers(), appended))
    }

    fn api_key_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            API_KEY_HEADER.to_string(),
            self.api_key.expose_secret().clone(),
        );
        headers
    }
}

/// Millisecond timestamps that never repeat or go backwards, corrected by
/// the last measured offset to the exchange clock.
#[derive(Debug, Default)]
pub struct Nonce {
    last: AtomicU64,
    offset_ms: AtomicI64,
}

impl Nonce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local wall clock in milliseconds since the epoch.
    pub fn local_millis() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    /// Record `server_time - local_time` so later nonces follow the exchange clock.
    pub fn set_offset(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::SeqCst);
    }

    pub fn offset(&self) -> i64 {
        self.offset_ms.load(Ordering::SeqCst)
    }

    /// Next timestamp: the corrected clock, bumped past the previous value if needed.
    pub fn next(&self) -> u64 {
        let corrected = (Self::local_millis() as i64 + self.offset()).max(0) as u64;
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(corrected.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        corrected.max(previous + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> HmacSigner {
        // Key pair from the Binance API documentation signing example
        HmacSigner::new(
            Secret::new("vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A".to_string()),
            Secret::new("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".to_string()),
        )
    }

    #[test]
    fn test_signature_matches_documented_example() {
        let payload = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = signer().signature(payload).unwrap();
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_sign_request_appends_timestamp_then_signature() {
        let signer = signer().with_recv_window(Some(5000));
        let (headers, params) = signer
            .sign_request(
                "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1",
                1_499_827_319_559,
            )
            .unwrap();

        assert!(headers.contains_key(API_KEY_HEADER));
        let keys: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["recvWindow", "timestamp", "signature"]);
        assert_eq!(
            params[2].1,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_nonce_strictly_increasing() {
        let nonce = Nonce::new();
        let mut previous = nonce.next();
        for _ in 0..1000 {
            let next = nonce.next();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_nonce_applies_offset() {
        let nonce = Nonce::new();
        nonce.set_offset(60_000);
        let ahead = nonce.next();
        assert!(ahead >= Nonce::local_millis() + 59_000);
    }

    #[test]
    fn test_nonce_never_goes_backwards_after_negative_offset() {
        let nonce = Nonce::new();
        let first = nonce.next();
        nonce.set_offset(-60_000);
        assert!(nonce.next() > first);
    }
}
