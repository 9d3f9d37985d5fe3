#![allow(dead_code)]

pub mod ws_server;

use async_trait::async_trait;
use binance_brokerage::core::errors::ExchangeError;
use binance_brokerage::core::kernel::{HttpRequest, HttpResponse, HttpTransport};
use binance_brokerage::core::traits::{OrderProvider, ReferencePrice, SecurityProvider};
use binance_brokerage::{Instrument, Order};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Scripted exchange: responses are queued per method and path. The last
/// response of a queue is repeated once the queue runs dry.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: impl Into<String>) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(HttpResponse {
                status,
                body: body.into(),
            });
    }

    pub fn respond_json(&self, method: Method, path: &str, body: &Value) {
        self.respond(method, path, 200, body.to_string());
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError> {
        let key = (request.method.clone(), request.path.clone());
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(&key).ok_or_else(|| {
            ExchangeError::NetworkError(format!("no scripted response for {} {}", key.0, key.1))
        })?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or_else(|| ExchangeError::NetworkError("empty response queue".to_string()))
    }
}

/// `key=value` pairs of a request's query or form body.
pub fn params_of(request: &HttpRequest) -> HashMap<String, String> {
    let payload = request.body.clone().unwrap_or_else(|| request.query.clone());
    payload
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn exchange_info(symbols: &[(&str, &str, &str)]) -> Value {
    let symbols: Vec<Value> = symbols
        .iter()
        .map(|(symbol, base, quote)| {
            json!({
                "symbol": symbol,
                "baseAsset": base,
                "quoteAsset": quote,
                "status": "TRADING",
                "contractType": "PERPETUAL"
            })
        })
        .collect();
    json!({ "symbols": symbols })
}

pub fn kline_row(open_time: i64, close: &str) -> Value {
    json!([open_time, "1.0", "2.0", "0.5", close, "10.0", open_time + 59_999, "0", 1, "0", "0", "0"])
}

#[derive(Default)]
pub struct OrderBook(pub Mutex<HashMap<String, Order>>);

impl OrderProvider for OrderBook {
    fn order_by_broker_id(&self, broker_id: &str) -> Option<Order> {
        self.0.lock().unwrap().get(broker_id).cloned()
    }
}

/// Fixed quote for every instrument.
pub struct FixedQuote(pub Option<ReferencePrice>);

impl SecurityProvider for FixedQuote {
    fn reference_price(&self, _instrument: &Instrument) -> Option<ReferencePrice> {
        self.0
    }
}

/// Poll until `done` holds, failing the test after five seconds.
pub async fn eventually(what: &str, done: impl Fn() -> bool) {
    let waited = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}
