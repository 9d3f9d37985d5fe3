use super::types::BinanceSymbolInfo;
use super::variant::MarketVariant;
use crate::core::errors::ExchangeError;
use crate::core::types::{Instrument, SecurityType};
use std::collections::HashMap;

/// One listed symbol as the mapper knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub wire_symbol: String,
    pub ticker: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: Option<String>,
}

/// Two-way translation between host tickers and exchange wire symbols for
/// one market variant, built from the exchange info listing.
#[derive(Debug, Clone)]
pub struct SymbolMapper {
    variant: MarketVariant,
    by_wire: HashMap<String, SymbolEntry>,
    by_ticker: HashMap<String, String>,
}

impl SymbolMapper {
    pub fn new(variant: MarketVariant, symbols: Vec<BinanceSymbolInfo>) -> Self {
        let mut by_wire = HashMap::with_capacity(symbols.len());
        let mut by_ticker = HashMap::with_capacity(symbols.len());

        for info in symbols {
            let ticker = host_ticker(&info);
            // Perpetuals win over delivery contracts sharing a pair
            if by_ticker.contains_key(&ticker) && !is_perpetual(&info) {
                continue;
            }
            if let Some(displaced) = by_ticker.insert(ticker.clone(), info.symbol.clone()) {
                if displaced != info.symbol {
                    by_wire.remove(&displaced);
                }
            }
            by_wire.insert(
                info.symbol.clone(),
                SymbolEntry {
                    wire_symbol: info.symbol,
                    ticker,
                    base_asset: info.base_asset,
                    quote_asset: info.quote_asset,
                    status: info.status,
                },
            );
        }

        Self {
            variant,
            by_wire,
            by_ticker,
        }
    }

    pub fn variant(&self) -> MarketVariant {
        self.variant
    }

    pub fn len(&self) -> usize {
        self.by_wire.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_wire.is_empty()
    }

    /// Wire symbol for a host instrument.
    pub fn to_brokerage_symbol(&self, instrument: &Instrument) -> Result<String, ExchangeError> {
        self.check_variant(instrument)?;
        self.by_ticker
            .get(&instrument.ticker)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownTicker(instrument.ticker.clone()))
    }

    /// Host instrument for a wire symbol.
    pub fn to_instrument(
        &self,
        wire_symbol: &str,
        security_type: SecurityType,
        market: &str,
    ) -> Result<Instrument, ExchangeError> {
        let entry = self
            .by_wire
            .get(wire_symbol)
            .ok_or_else(|| ExchangeError::UnknownTicker(wire_symbol.to_string()))?;
        Ok(Instrument::new(entry.ticker.clone(), security_type, market))
    }

    /// Host instrument for a wire symbol in this mapper's own market.
    pub fn instrument_for(&self, wire_symbol: &str) -> Result<Instrument, ExchangeError> {
        self.to_instrument(
            wire_symbol,
            self.variant.security_type(),
            self.variant.market(),
        )
    }

    pub fn is_known_symbol(&self, instrument: &Instrument) -> bool {
        self.check_variant(instrument).is_ok() && self.by_ticker.contains_key(&instrument.ticker)
    }

    pub fn entry(&self, wire_symbol: &str) -> Option<&SymbolEntry> {
        self.by_wire.get(wire_symbol)
    }

    fn check_variant(&self, instrument: &Instrument) -> Result<(), ExchangeError> {
        if instrument.security_type != self.variant.security_type()
            || instrument.market != self.variant.market()
        {
            return Err(ExchangeError::InvalidArgument(format!(
                "{} cannot be traded through {}",
                instrument,
                self.variant.name()
            )));
        }
        Ok(())
    }
}

fn is_perpetual(info: &BinanceSymbolInfo) -> bool {
    info.contract_type.as_deref() == Some("PERPETUAL")
}

/// Host ticker: the wire symbol, except coin-margined perpetuals which
/// drop their `_PERP` suffix.
fn host_ticker(info: &BinanceSymbolInfo) -> String {
    if is_perpetual(info) {
        if let Some(pair) = &info.pair {
            return pair.to_uppercase();
        }
    }
    info.symbol
        .strip_suffix("_PERP")
        .unwrap_or(&info.symbol)
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(symbol: &str, base: &str, quote: &str, contract: Option<&str>, pair: Option<&str>) -> BinanceSymbolInfo {
        BinanceSymbolInfo {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            status: Some("TRADING".to_string()),
            contract_type: contract.map(str::to_string),
            pair: pair.map(str::to_string),
        }
    }

    #[test]
    fn test_spot_round_trip() {
        let mapper = SymbolMapper::new(
            MarketVariant::Spot,
            vec![info("BTCUSDT", "BTC", "USDT", None, None), info("ETHBTC", "ETH", "BTC", None, None)],
        );
        for wire in ["BTCUSDT", "ETHBTC"] {
            let instrument = mapper.instrument_for(wire).unwrap();
            assert_eq!(mapper.to_brokerage_symbol(&instrument).unwrap(), wire);
            assert!(mapper.is_known_symbol(&instrument));
        }
    }

    #[test]
    fn test_coin_futures_perp_suffix() {
        let mapper = SymbolMapper::new(
            MarketVariant::CoinFutures,
            vec![
                info("BTCUSD_PERP", "BTC", "USD", Some("PERPETUAL"), Some("BTCUSD")),
                info("BTCUSD_240628", "BTC", "USD", Some("CURRENT_QUARTER"), Some("BTCUSD")),
            ],
        );
        let instrument = Instrument::crypto_future("BTCUSD");
        assert_eq!(mapper.to_brokerage_symbol(&instrument).unwrap(), "BTCUSD_PERP");
        assert_eq!(mapper.instrument_for("BTCUSD_PERP").unwrap().ticker, "BTCUSD");
    }

    #[test]
    fn test_perpetual_displaces_earlier_delivery_contract() {
        let mapper = SymbolMapper::new(
            MarketVariant::CoinFutures,
            vec![
                info("BTCUSD", "BTC", "USD", Some("CURRENT_QUARTER"), Some("BTCUSD")),
                info("BTCUSD_PERP", "BTC", "USD", Some("PERPETUAL"), Some("BTCUSD")),
            ],
        );
        let instrument = Instrument::crypto_future("BTCUSD");
        assert_eq!(mapper.to_brokerage_symbol(&instrument).unwrap(), "BTCUSD_PERP");
        assert!(mapper.entry("BTCUSD").is_none());
        assert!(matches!(
            mapper.instrument_for("BTCUSD"),
            Err(ExchangeError::UnknownTicker(_))
        ));
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn test_unknown_ticker_is_distinct_error() {
        let mapper = SymbolMapper::new(MarketVariant::Spot, vec![]);
        match mapper.to_brokerage_symbol(&Instrument::crypto("NOPEUSDT")) {
            Err(ExchangeError::UnknownTicker(t)) => assert_eq!(t, "NOPEUSDT"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            mapper.instrument_for("NOPEUSDT"),
            Err(ExchangeError::UnknownTicker(_))
        ));
    }

    #[test]
    fn test_wrong_variant_rejected() {
        let mapper = SymbolMapper::new(
            MarketVariant::Spot,
            vec![info("BTCUSDT", "BTC", "USDT", None, None)],
        );
        let future = Instrument::crypto_future("BTCUSDT");
        assert!(matches!(
            mapper.to_brokerage_symbol(&future),
            Err(ExchangeError::InvalidArgument(_))
        ));
        assert!(!mapper.is_known_symbol(&future));
    }
}
