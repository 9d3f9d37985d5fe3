use super::converters::convert_kline;
use super::rest::BinanceRestClient;
use crate::core::errors::ExchangeError;
use crate::core::types::{HistoryRequest, Kline, TickType};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// Cursor state carried between kline pages.
struct Page {
    client: Arc<BinanceRestClient>,
    symbol: String,
    interval: &'static str,
    cursor_ms: i64,
    end_ms: i64,
    step_ms: i64,
    limit: usize,
}

impl BinanceRestClient {
    /// Lazy, forward-paginated kline sequence for `request`.
    ///
    /// The request is validated before anything is fetched: an end before
    /// the start is an `InvalidParameters` error, and resolutions or tick
    /// types the klines endpoint cannot serve are `Unsupported`. Each page
    /// starts one interval after the last bar of the previous page, and the
    /// sequence ends on the first page that brings nothing new.
    pub fn get_history(
        self: &Arc<Self>,
        request: &HistoryRequest,
    ) -> Result<BoxStream<'static, Result<Kline, ExchangeError>>, ExchangeError> {
        if request.end < request.start {
            return Err(ExchangeError::InvalidParameters(format!(
                "History end {} is before start {}",
                request.end, request.start
            )));
        }
        if request.tick_type != TickType::Trade {
            return Err(ExchangeError::Unsupported(format!(
                "{:?} history is not available",
                request.tick_type
            )));
        }
        let interval = request.resolution.as_binance_interval().ok_or_else(|| {
            ExchangeError::Unsupported(format!(
                "{:?} resolution history is not available",
                request.resolution
            ))
        })?;
        let symbol = self.mapper().to_brokerage_symbol(&request.instrument)?;

        let page = Page {
            client: Arc::clone(self),
            symbol,
            interval,
            cursor_ms: request.start.timestamp_millis(),
            end_ms: request.end.timestamp_millis(),
            step_ms: request.resolution.duration().num_milliseconds(),
            limit: self.variant().max_klines_per_request(),
        };

        let pages = stream::try_unfold(page, next_page);

        Ok(pages
            .map_ok(|bars| stream::iter(bars.into_iter().map(Ok::<Kline, ExchangeError>)))
            .try_flatten()
            .boxed())
    }
}

/// Fetch the page at the cursor and advance it past the newest bar.
async fn next_page(mut page: Page) -> Result<Option<(Vec<Kline>, Page)>, ExchangeError> {
    if page.cursor_ms > page.end_ms {
        return Ok(None);
    }

    let rows = page
        .client
        .get_klines(
            &page.symbol,
            page.interval,
            page.cursor_ms,
            page.end_ms,
            page.limit,
        )
        .await?;

    let bars: Vec<Kline> = rows
        .iter()
        .filter(|row| row.open_time >= page.cursor_ms && row.open_time <= page.end_ms)
        .map(convert_kline)
        .collect();
    let Some(last_open) = rows.iter().map(|row| row.open_time).max() else {
        return Ok(None);
    };
    if bars.is_empty() {
        return Ok(None);
    }

    debug!(symbol = %page.symbol, bars = bars.len(), cursor = page.cursor_ms, "kline page");
    page.cursor_ms = last_open + page.step_ms;
    Ok(Some((bars, page)))
}
