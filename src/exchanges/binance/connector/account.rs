use super::BinanceBrokerage;
use crate::core::errors::ExchangeError;
use crate::core::types::{CashAmount, Holding, OpenOrder};
use tracing::instrument;

impl BinanceBrokerage {
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        self.client.get_open_orders().await
    }

    /// Futures positions; always empty for spot and margin.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn get_account_holdings(&self) -> Result<Vec<Holding>, ExchangeError> {
        self.client.get_account_holdings().await
    }

    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn get_cash_balance(&self) -> Result<Vec<CashAmount>, ExchangeError> {
        self.client.get_cash_balance().await
    }
}
