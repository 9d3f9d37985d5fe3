use super::variant::MarketVariant;
use crate::core::errors::ExchangeError;
use crate::core::types::{Order, OrderDirection, OrderKind, TimeInForce};
use rust_decimal::Decimal;

/// Which side of the reference price a stop sits on, from the order's
/// point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopFamily {
    StopLoss,
    TakeProfit,
}

/// Sell stops at or below the reference are stop-losses; buy stops strictly
/// above it are stop-losses. Everything else takes profit.
pub fn classify_stop(direction: OrderDirection, stop_price: Decimal, reference: Decimal) -> StopFamily {
    let is_stop_loss = match direction {
        OrderDirection::Sell => stop_price <= reference,
        OrderDirection::Buy => stop_price > reference,
    };
    if is_stop_loss {
        StopFamily::StopLoss
    } else {
        StopFamily::TakeProfit
    }
}

/// Wire order type for a stop-limit order on the given variant.
pub fn stop_limit_type(variant: MarketVariant, family: StopFamily) -> &'static str {
    match (variant.is_futures(), family) {
        (true, StopFamily::StopLoss) => "STOP",
        (true, StopFamily::TakeProfit) => "TAKE_PROFIT",
        (false, StopFamily::StopLoss) => "STOP_LOSS_LIMIT",
        (false, StopFamily::TakeProfit) => "TAKE_PROFIT_LIMIT",
    }
}

pub fn stop_market_type(family: StopFamily) -> &'static str {
    match family {
        StopFamily::StopLoss => "STOP_MARKET",
        StopFamily::TakeProfit => "TAKE_PROFIT_MARKET",
    }
}

/// True when the variant routes this order kind to its conditional-order endpoint.
pub fn is_algo_order(variant: MarketVariant, kind: &OrderKind) -> bool {
    variant.algo_order_endpoint().is_some()
        && matches!(kind, OrderKind::StopLimit { .. } | OrderKind::StopMarket { .. })
}

/// Whether placing this order needs a reference price first.
pub fn needs_reference_price(kind: &OrderKind) -> bool {
    matches!(kind, OrderKind::StopLimit { .. } | OrderKind::StopMarket { .. })
}

/// Endpoint and parameters for one order placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub endpoint: &'static str,
    pub params: Vec<(&'static str, String)>,
    pub is_algo: bool,
}

impl OrderRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Params borrowed in the shape the REST client takes.
    pub fn as_params(&self) -> Vec<(&str, String)> {
        self.params.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

/// Build the order body.
///
/// `reference` is the price stop orders are classified against; it must be
/// supplied for stop kinds.
pub fn build_order_request(
    variant: MarketVariant,
    order: &Order,
    symbol: &str,
    reference: Option<Decimal>,
) -> Result<OrderRequest, ExchangeError> {
    let mut params: Vec<(&'static str, String)> = vec![
        ("symbol", symbol.to_string()),
        ("quantity", order.quantity.abs().normalize().to_string()),
        ("side", order.direction.as_binance().to_string()),
    ];
    let mut endpoint = variant.order_endpoint();
    let mut is_algo = false;

    match order.kind {
        OrderKind::Market => {
            params.push(("type", "MARKET".to_string()));
        }
        OrderKind::Limit {
            limit_price,
            post_only,
        } => {
            if post_only && !variant.is_futures() {
                params.push(("type", "LIMIT_MAKER".to_string()));
            } else {
                params.push(("type", "LIMIT".to_string()));
                let tif = if post_only {
                    "GTX"
                } else {
                    time_in_force(order.time_in_force)
                };
                params.push(("timeInForce", tif.to_string()));
            }
            params.push(("price", limit_price.normalize().to_string()));
        }
        OrderKind::StopLimit {
            stop_price,
            limit_price,
        } => {
            if variant == MarketVariant::CoinFutures {
                return Err(ExchangeError::UnsupportedOrder(format!(
                    "{} does not support stop-limit orders",
                    variant.name()
                )));
            }
            let family = classify_stop(order.direction, stop_price, require_reference(reference)?);
            params.push(("type", stop_limit_type(variant, family).to_string()));
            params.push(("timeInForce", time_in_force(order.time_in_force).to_string()));
            params.push(("price", limit_price.normalize().to_string()));

            if let Some(algo_endpoint) = variant.algo_order_endpoint() {
                endpoint = algo_endpoint;
                is_algo = true;
                params.push(("algoType", "CONDITIONAL".to_string()));
                params.push(("triggerPrice", stop_price.normalize().to_string()));
            } else {
                params.push(("stopPrice", stop_price.normalize().to_string()));
            }
        }
        OrderKind::StopMarket { stop_price } => {
            if !variant.is_futures() {
                return Err(ExchangeError::UnsupportedOrder(format!(
                    "{} does not support stop-market orders",
                    variant.name()
                )));
            }
            let family = classify_stop(order.direction, stop_price, require_reference(reference)?);
            params.push(("type", stop_market_type(family).to_string()));

            if let Some(algo_endpoint) = variant.algo_order_endpoint() {
                endpoint = algo_endpoint;
                is_algo = true;
                params.push(("algoType", "CONDITIONAL".to_string()));
                params.push(("triggerPrice", stop_price.normalize().to_string()));
            } else {
                params.push(("stopPrice", stop_price.normalize().to_string()));
            }
        }
    }

    if variant == MarketVariant::CrossMargin {
        params.push(("isIsolated", "FALSE".to_string()));
        params.push(("sideEffectType", "MARGIN_BUY".to_string()));
    }

    Ok(OrderRequest {
        endpoint,
        params,
        is_algo,
    })
}

fn time_in_force(tif: TimeInForce) -> &'static str {
    tif.as_binance()
}

fn require_reference(reference: Option<Decimal>) -> Result<Decimal, ExchangeError> {
    reference.filter(|r| !r.is_zero()).ok_or_else(|| {
        ExchangeError::InvalidParameters(
            "Stop orders need a non-zero reference price".to_string(),
        )
    })
}
