use super::symbols::SymbolMapper;
use super::types::{
    BinanceBookTickerEvent, BinanceFuturesAccount, BinanceKline, BinanceMarginAccount,
    BinanceSpotAccount, BinanceTicker24h, BinanceTradeEvent, ParsedOrder,
};
use super::variant::MarketVariant;
use crate::core::errors::ExchangeError;
use crate::core::types::{
    BalanceEntry, Holding, Kline, OpenOrder, OrderDirection, OrderKind, OrderStatus,
    PriceChangeStatistics, Tick,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

pub fn parse_side(side: &str) -> Result<OrderDirection, ExchangeError> {
    match side {
        "BUY" => Ok(OrderDirection::Buy),
        "SELL" => Ok(OrderDirection::Sell),
        other => Err(ExchangeError::DeserializationError(format!(
            "Unknown order side '{}'",
            other
        ))),
    }
}

/// Quantity signed by side: BUY positive, SELL negative.
pub fn signed_quantity(side: &str, quantity: Decimal) -> Result<Decimal, ExchangeError> {
    Ok(parse_side(side)?.signed(quantity))
}

pub fn convert_order_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::Submitted,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Invalid,
        _ => OrderStatus::New,
    }
}

/// Order kind for a wire order type. `TAKE_PROFIT`/`STOP` carry a limit
/// price on futures but not on spot.
pub fn convert_order_kind(
    variant: MarketVariant,
    order_type: &str,
    price: Decimal,
    stop_price: Decimal,
) -> OrderKind {
    match order_type {
        "LIMIT" => OrderKind::Limit {
            limit_price: price,
            post_only: false,
        },
        "LIMIT_MAKER" => OrderKind::Limit {
            limit_price: price,
            post_only: true,
        },
        "STOP_LOSS_LIMIT" | "TAKE_PROFIT_LIMIT" => OrderKind::StopLimit {
            stop_price,
            limit_price: price,
        },
        "STOP" | "TAKE_PROFIT" if variant.is_futures() => OrderKind::StopLimit {
            stop_price,
            limit_price: price,
        },
        "STOP_LOSS" | "TAKE_PROFIT" | "STOP_MARKET" | "TAKE_PROFIT_MARKET" => {
            OrderKind::StopMarket { stop_price }
        }
        _ => OrderKind::Market,
    }
}

pub fn convert_open_order(
    order: ParsedOrder,
    mapper: &SymbolMapper,
) -> Result<OpenOrder, ExchangeError> {
    let direction = parse_side(&order.side)?;
    let instrument = mapper.instrument_for(&order.symbol)?;
    let kind = convert_order_kind(
        mapper.variant(),
        &order.order_type,
        order.price,
        order.stop_price,
    );

    Ok(OpenOrder {
        broker_id: order.id,
        is_algo: order.is_algo,
        instrument,
        direction,
        quantity: direction.signed(order.original_quantity),
        executed_quantity: order.executed_quantity,
        kind,
        status: order.status,
        time: millis_to_datetime(order.time),
    })
}

pub fn convert_spot_balances(account: BinanceSpotAccount) -> Vec<BalanceEntry> {
    account
        .balances
        .into_iter()
        .map(|b| BalanceEntry::Spot {
            asset: b.asset,
            free: b.free,
            locked: b.locked,
        })
        .collect()
}

pub fn convert_margin_balances(account: BinanceMarginAccount) -> Vec<BalanceEntry> {
    account
        .user_assets
        .into_iter()
        .map(|a| BalanceEntry::Margin {
            asset: a.asset,
            free: a.free,
            locked: a.locked,
            borrowed: a.borrowed,
            interest: a.interest,
            net_asset: a.net_asset,
        })
        .collect()
}

pub fn convert_futures_balances(account: &BinanceFuturesAccount) -> Vec<BalanceEntry> {
    account
        .assets
        .iter()
        .map(|a| BalanceEntry::Futures {
            asset: a.asset.clone(),
            wallet_balance: a.wallet_balance,
            available_balance: a.available_balance,
        })
        .collect()
}

/// Holdings from the non-zero futures positions. Positions in symbols the
/// mapper does not list are skipped.
pub fn convert_futures_holdings(
    account: &BinanceFuturesAccount,
    mapper: &SymbolMapper,
) -> Vec<Holding> {
    account
        .positions
        .iter()
        .filter(|p| !p.position_amt.is_zero())
        .filter_map(|p| {
            let instrument = mapper.instrument_for(&p.symbol).ok()?;
            let currency = mapper
                .entry(&p.symbol)
                .map(|e| e.quote_asset.clone())
                .unwrap_or_default();
            Some(Holding {
                instrument,
                average_price: p.entry_price,
                quantity: p.position_amt,
                market_price: p.mark_price.unwrap_or(p.entry_price),
                currency,
            })
        })
        .collect()
}

pub fn convert_kline(kline: &BinanceKline) -> Kline {
    Kline {
        open_time: millis_to_datetime(kline.open_time),
        open: kline.open,
        high: kline.high,
        low: kline.low,
        close: kline.close,
        volume: kline.volume,
    }
}

pub fn convert_ticker_statistics(ticker: BinanceTicker24h) -> PriceChangeStatistics {
    PriceChangeStatistics {
        symbol: ticker.symbol,
        last_price: ticker.last_price,
        price_change_percent: ticker.price_change_percent,
        volume: ticker.volume,
        quote_volume: ticker.quote_volume.unwrap_or_default(),
        count: ticker.count,
    }
}

/// Trade tick; trade ticks carry no direction, so quantity is absolute.
pub fn convert_trade(
    event: &BinanceTradeEvent,
    mapper: &SymbolMapper,
) -> Result<Tick, ExchangeError> {
    Ok(Tick::Trade {
        instrument: mapper.instrument_for(&event.symbol)?,
        time: millis_to_datetime(event.trade_time),
        price: event.price,
        quantity: event.quantity.abs(),
    })
}

/// Quote tick stamped with the local receive time.
pub fn convert_book_ticker(
    event: &BinanceBookTickerEvent,
    mapper: &SymbolMapper,
) -> Result<Tick, ExchangeError> {
    Ok(Tick::Quote {
        instrument: mapper.instrument_for(&event.symbol)?,
        time: Utc::now(),
        bid_price: event.bid_price,
        bid_size: event.bid_size,
        ask_price: event.ask_price,
        ask_size: event.ask_size,
    })
}
