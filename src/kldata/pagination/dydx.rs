//! dYdX 分页协议
//!
//! 请求地址为端点拼接品种名，`fromISO` 为不带时区的UTC时间（精确到秒），
//! 响应的 `candles` 新的在前。下一个 `fromISO` 为本页最新K线的开盘时间加一秒

use super::{ensure_progress, require_array, PageProtocol};
use crate::kldata::normalizer;
use crate::klcommon::{AppError, Candle, DownloadWindow, ExchangeId, PageRequest, Result};
use chrono::DateTime;
use serde_json::Value;

const FROM_ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone)]
pub struct DydxProtocol {
    endpoint: String,
    resolution: String,
}

impl DydxProtocol {
    pub fn new(endpoint: &str, resolution: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            resolution: resolution.to_string(),
        }
    }

    /// 秒级时间戳格式化为 `fromISO`
    pub fn format_from_iso(secs: i64) -> Result<String> {
        DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.format(FROM_ISO_FORMAT).to_string())
            .ok_or_else(|| AppError::PaginationError(format!("dydx: 时间戳超出范围 {}", secs)))
    }
}

impl PageProtocol for DydxProtocol {
    /// `fromISO` 对应的秒级时间戳
    type Cursor = i64;

    fn exchange(&self) -> ExchangeId {
        ExchangeId::Dydx
    }

    fn initial_cursor(&self, window: &DownloadWindow) -> i64 {
        window.start_ts.div_euclid(1000)
    }

    fn request(&self, symbol: &str, cursor: &i64, _window: &DownloadWindow) -> Result<PageRequest> {
        Ok(PageRequest::new(format!("{}{}", self.endpoint, symbol))
            .param("resolution", &self.resolution)
            .param("fromISO", Self::format_from_iso(*cursor)?))
    }

    fn parse_page(&self, _symbol: &str, response: &Value) -> Result<Vec<Candle>> {
        let records = require_array(response.get("candles"), "candles")?;
        let mut candles = normalizer::normalize_all(ExchangeId::Dydx, records)?;
        candles.reverse();
        Ok(candles)
    }

    /// 下一个 `fromISO` 已到达目标上界
    fn range_exhausted(&self, _cursor: &i64, page: &[Candle], window: &DownloadWindow) -> bool {
        page.last()
            .map_or(false, |newest| newest.timestamp.div_euclid(1000) + 1 >= window.end_ts.div_euclid(1000))
    }

    fn advance(&self, cursor: &i64, page: &[Candle], _window: &DownloadWindow) -> Result<i64> {
        let newest = page.last().ok_or_else(|| {
            AppError::PaginationError("dydx: 空页面无法推进游标".to_string())
        })?;
        ensure_progress(ExchangeId::Dydx, *cursor, newest.timestamp.div_euclid(1000) + 1, true)
    }
}
