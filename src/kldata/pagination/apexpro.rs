//! ApeX Pro 分页协议
//!
//! 按 `[start, end]`（秒）窗口查询，窗口宽度不超过 1499 根K线，响应 `data.<symbol>` 旧的在前。
//! 下一个窗口从本页最后一根K线之后 10 秒开始

use super::{ensure_progress, require_array, PageProtocol};
use crate::kldata::normalizer;
use crate::klcommon::{AppError, Candle, DownloadWindow, ExchangeId, PageRequest, Result};
use serde_json::Value;

/// 单个窗口最多覆盖的K线根数
pub const MAX_BARS_PER_WINDOW: i64 = 1499;

/// 下一个窗口相对上一页最后一根K线的偏移（秒）
const WINDOW_RESTART_OFFSET_SECS: i64 = 10;

/// 查询窗口（秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApexWindow {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone)]
pub struct ApexProProtocol {
    endpoint: String,
    interval: String,
}

fn bar_secs(window: &DownloadWindow) -> i64 {
    window.bar_interval_ms / 1000
}

fn window_from(start: i64, window: &DownloadWindow) -> ApexWindow {
    ApexWindow {
        start,
        end: (start + bar_secs(window) * MAX_BARS_PER_WINDOW).min(window.end_ts / 1000),
    }
}

impl ApexProProtocol {
    pub fn new(endpoint: &str, interval: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            interval: interval.to_string(),
        }
    }
}

impl PageProtocol for ApexProProtocol {
    type Cursor = ApexWindow;

    fn exchange(&self) -> ExchangeId {
        ExchangeId::ApexPro
    }

    fn initial_cursor(&self, window: &DownloadWindow) -> ApexWindow {
        window_from(window.start_ts / 1000, window)
    }

    fn request(&self, symbol: &str, cursor: &ApexWindow, _window: &DownloadWindow) -> Result<PageRequest> {
        Ok(PageRequest::new(&self.endpoint)
            .param("symbol", symbol)
            .param("start", cursor.start)
            .param("end", cursor.end)
            .param("interval", &self.interval))
    }

    fn parse_page(&self, symbol: &str, response: &Value) -> Result<Vec<Candle>> {
        let data = response
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| AppError::ParseError("响应中缺少 data 对象".to_string()))?;

        let records = require_array(data.get(symbol), &format!("data.{}", symbol))?;
        normalizer::normalize_all(ExchangeId::ApexPro, records)
    }

    /// 本页最后一根K线再过一个周期即到达目标上界
    fn range_exhausted(&self, _cursor: &ApexWindow, page: &[Candle], window: &DownloadWindow) -> bool {
        page.last()
            .map_or(false, |last| last.timestamp / 1000 + bar_secs(window) >= window.end_ts / 1000)
    }

    fn advance(&self, cursor: &ApexWindow, page: &[Candle], window: &DownloadWindow) -> Result<ApexWindow> {
        let last = page.last().ok_or_else(|| {
            AppError::PaginationError("apexpro: 空页面无法推进游标".to_string())
        })?;

        let start = ensure_progress(
            ExchangeId::ApexPro,
            cursor.start,
            last.timestamp / 1000 + WINDOW_RESTART_OFFSET_SECS,
            true,
        )?;
        Ok(window_from(start, window))
    }
}
