//! Bybit 分页协议
//!
//! `/v5/market/kline` 返回 `start` 之后的K线，新的在前。
//! 追加前先反转为旧的在前；下一个 `start` 由本页最新两根K线的间距外推一步，
//! 外推结果到达 `end_ts` 即结束

use super::{ensure_progress, require_array, PageProtocol};
use crate::kldata::normalizer;
use crate::klcommon::{AppError, Candle, DownloadWindow, ExchangeId, PageRequest, Result};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct BybitProtocol {
    endpoint: String,
    interval: String,
    category: Option<String>,
}

impl BybitProtocol {
    /// 本页之后的下一个 `start`，页面按旧的在前排列
    fn next_start(page: &[Candle], window: &DownloadWindow) -> Result<i64> {
        let next = match page {
            [] => {
                return Err(AppError::PaginationError(
                    "bybit: 空页面无法推进游标".to_string(),
                ))
            }
            [only] => only.timestamp.checked_add(window.bar_interval_ms),
            [.., second_newest, newest] => newest
                .timestamp
                .checked_sub(second_newest.timestamp)
                .and_then(|step| newest.timestamp.checked_add(step)),
        };
        next.ok_or_else(|| AppError::PaginationError("bybit: 下一个 start 超出时间戳范围".to_string()))
    }

    pub fn new(endpoint: &str, interval: &str, category: Option<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            interval: interval.to_string(),
            category,
        }
    }
}

impl PageProtocol for BybitProtocol {
    /// `start` 参数（毫秒）
    type Cursor = i64;

    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    fn initial_cursor(&self, window: &DownloadWindow) -> i64 {
        window.start_ts
    }

    fn request(&self, symbol: &str, cursor: &i64, _window: &DownloadWindow) -> Result<PageRequest> {
        let mut request = PageRequest::new(&self.endpoint);
        if let Some(category) = &self.category {
            request = request.param("category", category);
        }
        Ok(request
            .param("symbol", symbol)
            .param("start", cursor)
            .param("interval", &self.interval))
    }

    fn parse_page(&self, _symbol: &str, response: &Value) -> Result<Vec<Candle>> {
        let ret_msg = response.get("retMsg").and_then(Value::as_str);
        if ret_msg != Some("OK") {
            return Err(AppError::ParseError(format!(
                "retCode={} retMsg={}",
                response.get("retCode").map(|v| v.to_string()).unwrap_or_default(),
                ret_msg.unwrap_or("<缺失>")
            )));
        }

        let list = require_array(response.pointer("/result/list"), "result.list")?;
        let mut candles = normalizer::normalize_all(ExchangeId::Bybit, list)?;
        candles.reverse();
        Ok(candles)
    }

    /// 下一个 `start` 已到达目标上界。最新一根通常是尚未收盘的K线，开盘时间总在 `end_ts` 之前
    fn range_exhausted(&self, _cursor: &i64, page: &[Candle], window: &DownloadWindow) -> bool {
        !page.is_empty() && Self::next_start(page, window).map_or(true, |next| next >= window.end_ts)
    }

    fn advance(&self, cursor: &i64, page: &[Candle], window: &DownloadWindow) -> Result<i64> {
        ensure_progress(ExchangeId::Bybit, *cursor, Self::next_start(page, window)?, true)
    }
}
