use super::BinanceBrokerage;
use crate::core::errors::ExchangeError;
use crate::core::types::{HistoryRequest, Instrument, Kline, Subscription, TickerPrice};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::{debug, instrument};

impl BinanceBrokerage {
    /// Klines for `request`. Requests the exchange cannot serve produce a
    /// warning and an empty sequence; malformed ones are errors.
    #[instrument(skip(self, request), fields(ticker = %request.instrument.ticker, resolution = ?request.resolution))]
    pub fn get_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<BoxStream<'static, Result<Kline, ExchangeError>>, ExchangeError> {
        match self.client.get_history(request) {
            Ok(bars) => Ok(bars),
            Err(ExchangeError::Unsupported(reason)) => {
                self.events.warning("InvalidHistoryRequest", reason);
                Ok(stream::empty().boxed())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_tickers(&self) -> Result<Vec<TickerPrice>, ExchangeError> {
        self.client.get_tickers().await
    }

    /// Start delivering ticks on the tick channel.
    pub async fn subscribe(&self, subscription: &Subscription) -> Result<bool, ExchangeError> {
        self.load_weights().await;
        self.subscriptions.subscribe(subscription).await
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, ExchangeError> {
        self.subscriptions.unsubscribe(subscription).await
    }

    pub async fn is_subscribed(&self, instrument: &Instrument) -> bool {
        self.subscriptions.is_subscribed(instrument).await
    }

    /// Fetch 24h trade counts once, before the first placement.
    async fn load_weights(&self) {
        if self.weights_loaded.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.client.get_ticker_price_change_statistics().await {
            Ok(stats) => {
                let weights: HashMap<String, u64> =
                    stats.into_iter().map(|s| (s.symbol, s.count)).collect();
                debug!(symbols = weights.len(), "subscription weights loaded");
                self.subscriptions.set_weights(weights);
            }
            Err(e) => self.events.warning(
                "SubscriptionWeights",
                format!("24h statistics unavailable, placing without weights: {}", e),
            ),
        }
    }
}
