use super::converters::{
    convert_futures_balances, convert_futures_holdings, convert_margin_balances, convert_open_order,
    convert_spot_balances, convert_ticker_statistics,
};
use super::events::EventSink;
use super::symbols::SymbolMapper;
use super::trading::{build_order_request, is_algo_order, needs_reference_price};
use super::types::{
    BinanceExchangeInfo, BinanceFuturesAccount, BinanceKline, BinanceListenKey,
    BinanceMarginAccount, BinanceOrderShape, BinanceServerTime, BinanceSpotAccount,
    BinanceTicker24h, BinanceTickerPrice,
};
use super::variant::MarketVariant;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{HttpResponse, Nonce, RateLimitedRest, RequestAuth, RestClient};
use crate::core::types::{
    BalanceEntry, CashAmount, Holding, OpenOrder, Order, OrderEvent, OrderStatus,
    PriceChangeStatistics, TickerPrice,
};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Typed Binance REST surface for one market variant.
///
/// Variant differences (endpoint prefixes, account payloads, order routing)
/// are resolved through [`MarketVariant`]; everything else is shared.
pub struct BinanceRestClient {
    rest: RateLimitedRest,
    variant: MarketVariant,
    mapper: Arc<SymbolMapper>,
    events: EventSink,
    listen_key: Mutex<Option<String>>,
}

impl BinanceRestClient {
    /// Load the exchange listing and build the client around it.
    pub async fn connect(
        rest: RateLimitedRest,
        variant: MarketVariant,
        events: EventSink,
    ) -> Result<Self, ExchangeError> {
        let info: BinanceExchangeInfo = rest
            .get_json(&variant.exchange_info_endpoint(), &[], RequestAuth::Public)
            .await?;
        let mapper = SymbolMapper::new(variant, info.symbols);
        info!(variant = variant.name(), symbols = mapper.len(), "exchange info loaded");
        Ok(Self::with_mapper(rest, variant, Arc::new(mapper), events))
    }

    pub fn with_mapper(
        rest: RateLimitedRest,
        variant: MarketVariant,
        mapper: Arc<SymbolMapper>,
        events: EventSink,
    ) -> Self {
        Self {
            rest,
            variant,
            mapper,
            events,
            listen_key: Mutex::new(None),
        }
    }

    pub fn variant(&self) -> MarketVariant {
        self.variant
    }

    pub fn mapper(&self) -> &Arc<SymbolMapper> {
        &self.mapper
    }

    pub fn rest(&self) -> &RateLimitedRest {
        &self.rest
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub async fn get_exchange_info(&self) -> Result<BinanceExchangeInfo, ExchangeError> {
        self.rest
            .get_json(&self.variant.exchange_info_endpoint(), &[], RequestAuth::Public)
            .await
    }

    /// Measure the exchange clock and shift later request timestamps onto it.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn sync_server_time(&self) -> Result<i64, ExchangeError> {
        let time: BinanceServerTime = self
            .rest
            .get_json(&self.variant.time_endpoint(), &[], RequestAuth::Public)
            .await?;
        let offset = time.server_time - Nonce::local_millis() as i64;
        self.rest.nonce().set_offset(offset);
        debug!(offset_ms = offset, "server clock offset applied");
        Ok(offset)
    }

    /// Non-zero balance lines in the variant's own shape.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn get_balances(&self) -> Result<Vec<BalanceEntry>, ExchangeError> {
        let endpoint = self.variant.account_endpoint();
        let balances = match self.variant {
            MarketVariant::Spot | MarketVariant::UsSpot => {
                let account: BinanceSpotAccount =
                    self.rest.get_json(endpoint, &[], RequestAuth::Signed).await?;
                convert_spot_balances(account)
            }
            MarketVariant::CrossMargin => {
                let account: BinanceMarginAccount =
                    self.rest.get_json(endpoint, &[], RequestAuth::Signed).await?;
                convert_margin_balances(account)
            }
            MarketVariant::UsdtFutures | MarketVariant::CoinFutures => {
                convert_futures_balances(&self.futures_account().await?)
            }
        };
        Ok(balances
            .into_iter()
            .filter(|b| !b.amount().is_zero())
            .collect())
    }

    pub async fn get_cash_balance(&self) -> Result<Vec<CashAmount>, ExchangeError> {
        Ok(self
            .get_balances()
            .await?
            .iter()
            .map(BalanceEntry::to_cash)
            .collect())
    }

    /// Open positions. Spot and margin accounts hold assets, not positions,
    /// so they report none.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn get_account_holdings(&self) -> Result<Vec<Holding>, ExchangeError> {
        if !self.variant.is_futures() {
            return Ok(Vec::new());
        }
        let account = self.futures_account().await?;
        Ok(convert_futures_holdings(&account, &self.mapper))
    }

    async fn futures_account(&self) -> Result<BinanceFuturesAccount, ExchangeError> {
        self.rest
            .get_json(self.variant.account_endpoint(), &[], RequestAuth::Signed)
            .await
    }

    /// Regular open orders plus, where the variant has them, open algo orders.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        let mut payloads: Vec<Value> = self
            .rest
            .get_json(self.variant.open_orders_endpoint(), &[], RequestAuth::Signed)
            .await?;

        if let Some(endpoint) = self.variant.open_algo_orders_endpoint() {
            let algo: Value = self.rest.get_json(endpoint, &[], RequestAuth::Signed).await?;
            payloads.extend(order_list(algo));
        }

        payloads
            .into_iter()
            .map(|payload| {
                let parsed = BinanceOrderShape::from_value(payload)?.normalize();
                convert_open_order(parsed, &self.mapper)
            })
            .collect()
    }

    /// Send an order. Returns the broker id once the exchange accepts it,
    /// `None` when it rejects it; the rejection is reported to the host as
    /// an `Invalid` order event.
    ///
    /// `reference` is the host's current price for stop classification;
    /// a missing or zero value falls back to the live ticker price.
    #[instrument(skip(self, order), fields(variant = self.variant.name(), order_id = order.id, kind = order.kind.name()))]
    pub async fn place_order(
        &self,
        order: &Order,
        reference: Option<Decimal>,
    ) -> Result<Option<String>, ExchangeError> {
        let symbol = self.mapper.to_brokerage_symbol(&order.instrument)?;

        let reference = if needs_reference_price(&order.kind) {
            match reference.filter(|r| !r.is_zero()) {
                Some(price) => Some(price),
                None => Some(self.ticker_price(&symbol).await?),
            }
        } else {
            None
        };

        let request = build_order_request(self.variant, order, &symbol, reference)?;
        let response = self
            .rest
            .execute(Method::POST, request.endpoint, &request.as_params(), RequestAuth::Signed)
            .await?;

        match self.check(response)? {
            Ok(body) => {
                let parsed = BinanceOrderShape::from_value(serde_json::from_str(&body)?)?.normalize();
                info!(broker_id = %parsed.id, algo = parsed.is_algo, "order accepted");
                self.events.order_id_changed(order.id, vec![parsed.id.clone()]);
                self.events
                    .order(OrderEvent::status(order, OrderStatus::Submitted, ""));
                Ok(Some(parsed.id))
            }
            Err(rejection) => {
                let text = format!("Order {} rejected: {}", order.id, rejection);
                self.events
                    .order(OrderEvent::status(order, OrderStatus::Invalid, text.clone()));
                self.events.warning("OrderRejected", text);
                Ok(None)
            }
        }
    }

    /// Cancel an order by its broker id. Returns `false` when the exchange
    /// refuses, e.g. because the order already filled.
    #[instrument(skip(self, order), fields(variant = self.variant.name(), order_id = order.id))]
    pub async fn cancel_order(&self, order: &Order) -> Result<bool, ExchangeError> {
        let broker_id = order.broker_ids.first().ok_or_else(|| {
            ExchangeError::InvalidParameters(format!("Order {} has no broker id", order.id))
        })?;

        let (endpoint, params) = match self.variant.algo_order_endpoint() {
            Some(endpoint) if is_algo_order(self.variant, &order.kind) => {
                (endpoint, vec![("algoId", broker_id.clone())])
            }
            _ => {
                let symbol = self.mapper.to_brokerage_symbol(&order.instrument)?;
                (
                    self.variant.order_endpoint(),
                    vec![("symbol", symbol), ("orderId", broker_id.clone())],
                )
            }
        };

        let response = self
            .rest
            .execute(Method::DELETE, endpoint, &params, RequestAuth::Signed)
            .await?;

        match self.check(response)? {
            Ok(_) => {
                self.events
                    .order(OrderEvent::status(order, OrderStatus::Canceled, "Canceled by host"));
                Ok(true)
            }
            Err(rejection) => {
                self.events.warning(
                    "CancelRejected",
                    format!("Order {} could not be canceled: {}", order.id, rejection),
                );
                Ok(false)
            }
        }
    }

    /// 24h statistics for every symbol on the variant.
    pub async fn get_ticker_price_change_statistics(
        &self,
    ) -> Result<Vec<PriceChangeStatistics>, ExchangeError> {
        let tickers: Vec<BinanceTicker24h> = self
            .rest
            .get_json(&self.variant.ticker_24hr_endpoint(), &[], RequestAuth::Public)
            .await?;
        Ok(tickers.into_iter().map(convert_ticker_statistics).collect())
    }

    pub async fn get_tickers(&self) -> Result<Vec<TickerPrice>, ExchangeError> {
        let tickers: Vec<BinanceTickerPrice> = self
            .rest
            .get_json(&self.variant.ticker_price_endpoint(), &[], RequestAuth::Public)
            .await?;
        Ok(tickers
            .into_iter()
            .map(|t| TickerPrice {
                symbol: t.symbol,
                price: t.price,
            })
            .collect())
    }

    /// Last traded price for one wire symbol.
    pub async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        // Coin futures answer with a one-element list
        let value: Value = self
            .rest
            .get_json(
                &self.variant.ticker_price_endpoint(),
                &[("symbol", symbol.to_string())],
                RequestAuth::Public,
            )
            .await?;
        let value = match value {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };
        let ticker: BinanceTickerPrice = serde_json::from_value(value)?;
        Ok(ticker.price)
    }

    /// One page of klines.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<BinanceKline>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", limit.to_string()),
        ];
        self.rest
            .get_json(&self.variant.klines_endpoint(), &params, RequestAuth::Public)
            .await
    }

    /// Allocate a user-data listen key and remember it for keepalives.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        let mut slot = self.listen_key.lock().await;
        let key: BinanceListenKey = self
            .rest
            .post_json(self.variant.user_data_stream_endpoint(), &[], RequestAuth::ApiKey)
            .await?;
        *slot = Some(key.listen_key.clone());
        Ok(key.listen_key)
    }

    /// Extend the current listen key's lifetime.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn session_keep_alive(&self) -> Result<(), ExchangeError> {
        let slot = self.listen_key.lock().await;
        let key = slot.as_ref().ok_or(ExchangeError::SessionNotStarted)?;
        let _: Value = self
            .rest
            .put_json(
                self.variant.user_data_stream_endpoint(),
                &[("listenKey", key.clone())],
                RequestAuth::ApiKey,
            )
            .await?;
        Ok(())
    }

    /// Close the listen key, if one is open.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn stop_session(&self) -> Result<(), ExchangeError> {
        let mut slot = self.listen_key.lock().await;
        if let Some(key) = slot.take() {
            let _: Value = self
                .rest
                .delete_json(
                    self.variant.user_data_stream_endpoint(),
                    &[("listenKey", key)],
                    RequestAuth::ApiKey,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn listen_key(&self) -> Option<String> {
        self.listen_key.lock().await.clone()
    }

    /// Split a final response into its body, a host-visible rejection, or
    /// a hard error. Only 4xx answers other than 429 count as rejections.
    fn check(
        &self,
        response: HttpResponse,
    ) -> Result<Result<String, ExchangeError>, ExchangeError> {
        if response.is_success() {
            return Ok(Ok(response.body));
        }
        let error = if response.is_rate_limited() {
            ExchangeError::RateLimitExceeded {
                attempts: self.rest.max_attempts(),
                body: response.body,
            }
        } else {
            ExchangeError::api(response.status, response.body)
        };
        if error.is_rejection() {
            Ok(Err(error))
        } else {
            Err(error)
        }
    }
}

/// Algo open-order listings come either bare or wrapped in `orders`.
fn order_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("orders") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
