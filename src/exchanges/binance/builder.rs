use super::variant::MarketVariant;
use crate::core::config::BrokerageConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    HmacSigner, HttpTransport, RateGate, RateLimitedRest, RestClientBuilder, RestClientConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Base URLs after applying config overrides to the variant defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub rest_url: String,
    pub ws_url: String,
}

pub fn resolve_endpoints(config: &BrokerageConfig, variant: MarketVariant) -> Endpoints {
    Endpoints {
        rest_url: config
            .rest_url
            .clone()
            .unwrap_or_else(|| variant.rest_url(config.testnet).to_string()),
        ws_url: config
            .ws_url
            .clone()
            .unwrap_or_else(|| variant.ws_url(config.testnet).to_string()),
    }
}

/// Assemble the rate-limited REST client for a variant.
///
/// Signing is only wired in when the config carries credentials. A
/// transport override replaces reqwest, which is how tests script the
/// exchange.
pub fn build_rest(
    config: &BrokerageConfig,
    variant: MarketVariant,
    transport: Option<Arc<dyn HttpTransport>>,
    cancel: CancellationToken,
) -> Result<RateLimitedRest, ExchangeError> {
    let endpoints = resolve_endpoints(config, variant);
    let rest_config = RestClientConfig::new(endpoints.rest_url, variant.name().to_string())
        .with_retry(config.retry);

    let mut builder = RestClientBuilder::new(rest_config)
        .with_gate(Arc::new(RateGate::new(
            "rest",
            config.rest_quota.requests,
            config.rest_quota.window,
        )))
        .with_cancellation(cancel);

    if config.has_credentials() {
        let signer = HmacSigner::new(config.api_key.clone(), config.secret_key.clone())
            .with_recv_window(config.recv_window_ms);
        builder = builder.with_signer(Arc::new(signer));
    }
    if let Some(transport) = transport {
        builder = builder.with_transport(transport);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Venue;

    #[test]
    fn test_overrides_win_over_defaults() {
        let config = BrokerageConfig::read_only(Venue::Binance)
            .rest_url("http://localhost:8080".to_string());
        let endpoints = resolve_endpoints(&config, MarketVariant::Spot);
        assert_eq!(endpoints.rest_url, "http://localhost:8080");
        assert_eq!(endpoints.ws_url, "wss://stream.binance.com:9443");
    }

    #[test]
    fn test_testnet_defaults() {
        let config = BrokerageConfig::read_only(Venue::BinanceUsdtFutures).testnet(true);
        let endpoints = resolve_endpoints(&config, MarketVariant::UsdtFutures);
        assert_eq!(endpoints.rest_url, "https://testnet.binancefuture.com");
        assert_eq!(endpoints.ws_url, "wss://fstream.binancefuture.com");
    }

    #[test]
    fn test_read_only_config_builds_unsigned_client() {
        let config = BrokerageConfig::read_only(Venue::Binance);
        let rest = build_rest(&config, MarketVariant::Spot, None, CancellationToken::new()).unwrap();
        assert!(!rest.has_signer());
        assert_eq!(rest.exchange_name(), "binance-spot");
    }
}
