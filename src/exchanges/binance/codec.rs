use super::types::{BinanceBookTickerEvent, BinanceExecutionFields, BinanceTradeEvent, Execution};
use super::variant::MarketVariant;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::frame_text;
use crate::core::kernel::WsCodec;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_tungstenite::tungstenite::Message;

/// Decoded frame from either the market-data pool or the user-data socket.
#[derive(Debug, Clone)]
pub enum BinanceMessage {
    Trade(BinanceTradeEvent),
    Quote(BinanceBookTickerEvent),
    /// Fill-relevant execution (`TRADE` or `EXPIRED`)
    Execution(Execution),
    /// Server-side error frame
    Error(String),
    ListenKeyExpired,
}

/// Stream name for a symbol and channel, e.g. `btcusdt@bookTicker`.
pub fn stream_name(symbol: &str, channel: &str) -> String {
    format!("{}@{}", symbol.to_lowercase(), channel)
}

/// Both streams a subscribed symbol needs on the given variant.
pub fn symbol_streams(variant: MarketVariant, symbol: &str) -> [String; 2] {
    [
        stream_name(symbol, variant.trade_channel()),
        stream_name(symbol, "bookTicker"),
    ]
}

pub struct BinanceCodec {
    variant: MarketVariant,
    next_id: AtomicU64,
}

impl BinanceCodec {
    pub fn new(variant: MarketVariant) -> Self {
        Self {
            variant,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn variant(&self) -> MarketVariant {
        self.variant
    }

    fn control_frame(&self, method: &str, streams: &[impl AsRef<str> + Send + Sync]) -> Message {
        let params: Vec<&str> = streams.iter().map(AsRef::as_ref).collect();
        let frame = json!({
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        Message::Text(frame.to_string())
    }

    /// Classify a parsed frame. Split out of `decode_message` so payloads can
    /// be checked without building WebSocket frames.
    pub fn decode_value(&self, value: Value) -> Result<Option<BinanceMessage>, ExchangeError> {
        // Combined-stream wrapper
        let value = match value {
            Value::Object(mut map) if map.contains_key("stream") && map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };

        if let Some(error) = value.get("error") {
            if !error.is_null() {
                return Ok(Some(BinanceMessage::Error(error.to_string())));
            }
        }

        match value.get("e").and_then(Value::as_str) {
            Some("trade" | "aggTrade") => parse(&value).map(|t| Some(BinanceMessage::Trade(t))),
            Some("bookTicker") => parse(&value).map(|q| Some(BinanceMessage::Quote(q))),
            Some("executionReport") => {
                let fields: BinanceExecutionFields = parse(&value)?;
                Ok(self.fill(fields))
            }
            Some("ORDER_TRADE_UPDATE") => {
                let inner = value.get("o").ok_or_else(|| {
                    ExchangeError::DeserializationError(format!(
                        "ORDER_TRADE_UPDATE without 'o': {}",
                        value
                    ))
                })?;
                let fields: BinanceExecutionFields = parse(inner)?;
                Ok(self.fill(fields))
            }
            Some("listenKeyExpired") => Ok(Some(BinanceMessage::ListenKeyExpired)),
            Some(_) => Ok(None),
            // Spot book tickers carry no event type
            None if value.get("u").is_some() && value.get("b").is_some() => {
                parse(&value).map(|q| Some(BinanceMessage::Quote(q)))
            }
            None => Ok(None),
        }
    }

    fn fill(&self, fields: BinanceExecutionFields) -> Option<BinanceMessage> {
        let execution = Execution::from_fields(fields, self.variant.is_futures());
        execution.is_fill().then_some(BinanceMessage::Execution(execution))
    }
}

fn parse<T: DeserializeOwned>(value: &Value) -> Result<T, ExchangeError> {
    T::deserialize(value).map_err(|e| {
        ExchangeError::DeserializationError(format!("{} in payload {}", e, value))
    })
}

impl WsCodec for BinanceCodec {
    type Message = BinanceMessage;

    fn encode_subscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError> {
        Ok(self.control_frame("SUBSCRIBE", streams))
    }

    fn encode_unsubscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError> {
        Ok(self.control_frame("UNSUBSCRIBE", streams))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError> {
        let Some(text) = frame_text(message)? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse JSON: {} - {}", e, text))
        })?;
        self.decode_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(codec: &BinanceCodec, text: &str) -> Option<BinanceMessage> {
        codec
            .decode_message(Message::Text(text.to_string()))
            .unwrap()
    }

    #[test]
    fn test_control_frames_have_increasing_ids() {
        let codec = BinanceCodec::new(MarketVariant::Spot);
        let streams = symbol_streams(MarketVariant::Spot, "BTCUSDT");
        let first = codec.encode_subscription(&streams).unwrap();
        let second = codec.encode_unsubscription(&streams).unwrap();

        let first: Value = serde_json::from_str(&first.into_text().unwrap()).unwrap();
        let second: Value = serde_json::from_str(&second.into_text().unwrap()).unwrap();
        assert_eq!(first["method"], "SUBSCRIBE");
        assert_eq!(first["params"], json!(["btcusdt@trade", "btcusdt@bookTicker"]));
        assert_eq!(second["method"], "UNSUBSCRIBE");
        assert!(second["id"].as_u64() > first["id"].as_u64());
    }

    #[test]
    fn test_futures_use_agg_trade_channel() {
        assert_eq!(
            symbol_streams(MarketVariant::UsdtFutures, "ETHUSDT")[0],
            "ethusdt@aggTrade"
        );
    }

    #[test]
    fn test_spot_book_ticker_without_event_type() {
        let codec = BinanceCodec::new(MarketVariant::Spot);
        let msg = decode(
            &codec,
            r#"{"u":400900217,"s":"BNBUSDT","b":"25.35190000","B":"31.21000000","a":"25.36520000","A":"40.66000000"}"#,
        );
        match msg {
            Some(BinanceMessage::Quote(q)) => assert_eq!(q.symbol, "BNBUSDT"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_trade_in_combined_stream_wrapper() {
        let codec = BinanceCodec::new(MarketVariant::UsdtFutures);
        let msg = decode(
            &codec,
            r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":123456789,"s":"BTCUSDT","a":5933014,"p":"0.001","q":"100","f":100,"l":105,"T":123456785,"m":true}}"#,
        );
        assert!(matches!(msg, Some(BinanceMessage::Trade(_))));
    }

    #[test]
    fn test_only_trade_and_expired_executions_are_fills() {
        let codec = BinanceCodec::new(MarketVariant::Spot);
        let report = |x: &str| {
            format!(
                r#"{{"e":"executionReport","E":1,"s":"ETHBTC","S":"BUY","o":"LIMIT","x":"{}","X":"NEW","i":4293153,"l":"0.0","L":"0.0","n":"0","N":null,"T":1499405658657}}"#,
                x
            )
        };
        for kind in ["NEW", "CANCELED", "REJECTED", "REPLACED"] {
            assert!(decode(&codec, &report(kind)).is_none(), "{} leaked", kind);
        }
        for kind in ["TRADE", "trade", "EXPIRED"] {
            assert!(
                matches!(decode(&codec, &report(kind)), Some(BinanceMessage::Execution(_))),
                "{} dropped",
                kind
            );
        }
    }

    #[test]
    fn test_futures_order_update_nested_under_o() {
        let codec = BinanceCodec::new(MarketVariant::UsdtFutures);
        let msg = decode(
            &codec,
            r#"{"e":"ORDER_TRADE_UPDATE","E":1568879465651,"T":1568879465650,"o":{"s":"BTCUSDT","c":"TEST","S":"SELL","o":"TRAILING_STOP_MARKET","x":"TRADE","X":"PARTIALLY_FILLED","i":8886774,"l":"0.001","L":"7103.04","N":"USDT","n":"0.0028","T":1568879465650,"ai":"3000000000123"}}"#,
        );
        match msg {
            Some(BinanceMessage::Execution(e)) => {
                assert_eq!(e.order_id, "8886774");
                assert_eq!(e.real_algo_id(), Some("3000000000123"));
                assert_eq!(e.fee_currency.as_deref(), Some("USDT"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_and_ack_frames() {
        let codec = BinanceCodec::new(MarketVariant::Spot);
        assert!(matches!(
            decode(&codec, r#"{"error":{"code":2,"msg":"Invalid request"},"id":3}"#),
            Some(BinanceMessage::Error(_))
        ));
        assert!(decode(&codec, r#"{"result":null,"id":1}"#).is_none());
        assert!(matches!(
            decode(&codec, r#"{"e":"listenKeyExpired","E":1576653824250}"#),
            Some(BinanceMessage::ListenKeyExpired)
        ));
    }

    #[test]
    fn test_malformed_frame_is_error_with_payload() {
        let codec = BinanceCodec::new(MarketVariant::Spot);
        match codec.decode_message(Message::Text(r#"{"e":"trade","s":"X"}"#.to_string())) {
            Err(ExchangeError::DeserializationError(msg)) => assert!(msg.contains("\"s\"")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
