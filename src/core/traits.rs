use crate::core::errors::ExchangeError;
use crate::core::types::{Instrument, Order};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Host-side order book of record. The brokerage only reads from it to
/// reconcile exchange events with orders the host placed.
pub trait OrderProvider: Send + Sync {
    /// Find the host order that carries the given exchange-assigned id.
    fn order_by_broker_id(&self, broker_id: &str) -> Option<Order>;
}

/// Best bid/ask the host currently knows for an instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferencePrice {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Host-side security cache used to price stop orders.
pub trait SecurityProvider: Send + Sync {
    fn reference_price(&self, instrument: &Instrument) -> Option<ReferencePrice>;
}

/// Account service consulted once while the brokerage is constructed.
#[async_trait]
pub trait EntitlementCheck: Send + Sync {
    async fn verify(&self) -> Result<(), ExchangeError>;
}

/// Entitlement check that always passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEntitlementCheck;

#[async_trait]
impl EntitlementCheck for NoEntitlementCheck {
    async fn verify(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}
