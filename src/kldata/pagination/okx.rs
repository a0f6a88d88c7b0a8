//! OKX 分页协议
//!
//! `history-candles` 返回 `after` 之前（不含）的K线，新的在前。
//! 游标从 `end_ts` 出发向过去走，每页之后取本页最旧的时间戳作为下一个 `after`

use super::{ensure_progress, require_array, PageProtocol};
use crate::kldata::normalizer;
use crate::klcommon::{AppError, Candle, DownloadWindow, ExchangeId, PageRequest, Result};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct OkxProtocol {
    endpoint: String,
    bar: String,
}

impl OkxProtocol {
    pub fn new(endpoint: &str, bar: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            bar: bar.to_string(),
        }
    }
}

impl PageProtocol for OkxProtocol {
    /// `after` 参数（毫秒）
    type Cursor = i64;

    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn initial_cursor(&self, window: &DownloadWindow) -> i64 {
        window.end_ts
    }

    fn request(&self, symbol: &str, cursor: &i64, _window: &DownloadWindow) -> Result<PageRequest> {
        Ok(PageRequest::new(&self.endpoint)
            .param("instId", symbol)
            .param("after", cursor)
            .param("bar", &self.bar))
    }

    fn parse_page(&self, _symbol: &str, response: &Value) -> Result<Vec<Candle>> {
        let code = response.get("code").and_then(Value::as_str);
        if code != Some("0") {
            return Err(AppError::ParseError(format!(
                "code={} msg={}",
                code.unwrap_or("<缺失>"),
                response.get("msg").and_then(Value::as_str).unwrap_or("")
            )));
        }

        let data = require_array(response.get("data"), "data")?;
        normalizer::normalize_all(ExchangeId::Okx, data)
    }

    /// 本页最旧的K线已经不晚于起点，或者游标本身已越过起点
    fn range_exhausted(&self, cursor: &i64, page: &[Candle], window: &DownloadWindow) -> bool {
        *cursor <= window.start_ts
            || page
                .last()
                .map_or(false, |oldest| oldest.timestamp <= window.start_ts)
    }

    fn advance(&self, cursor: &i64, page: &[Candle], _window: &DownloadWindow) -> Result<i64> {
        let oldest = page.last().ok_or_else(|| {
            AppError::PaginationError("okx: 空页面无法推进游标".to_string())
        })?;
        ensure_progress(ExchangeId::Okx, *cursor, oldest.timestamp, false)
    }
}

#[cfg(test)]
mod tests {
    use super::super::run_pagination;
    use super::super::testing::{settings, ScriptedFetcher};
    use super::*;
    use serde_json::json;

    const MINUTE: i64 = 60_000;

    fn protocol() -> OkxProtocol {
        OkxProtocol::new("https://www.okx.com/api/v5/market/history-candles", "1m")
    }

    fn page(timestamps: impl IntoIterator<Item = i64>) -> Value {
        let rows: Vec<Value> = timestamps
            .into_iter()
            .map(|ts| json!([ts.to_string(), "26502.6", "26533.2", "26279", "26454.5", "1193839"]))
            .collect();
        json!({"code": "0", "msg": "", "data": rows})
    }

    fn window(start_min: i64, end_min: i64) -> DownloadWindow {
        DownloadWindow {
            start_ts: start_min * MINUTE,
            end_ts: end_min * MINUTE,
            bar_interval_ms: MINUTE,
        }
    }

    #[tokio::test]
    async fn test_short_first_page_issues_single_request() {
        let fetcher = ScriptedFetcher::new(vec![page([99 * MINUTE, 98 * MINUTE])]);

        let candles = run_pagination(&protocol(), &fetcher, &settings(100), "BTC-USDT-SWAP", &window(0, 100))
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].get("instId"), Some("BTC-USDT-SWAP"));
        assert_eq!(requests[0].get("after"), Some("6000000"));
        assert_eq!(requests[0].get("bar"), Some("1m"));
    }

    #[tokio::test]
    async fn test_cursor_walks_backward_to_oldest_record() {
        let fetcher = ScriptedFetcher::new(vec![
            page((96..100).rev().map(|m| m * MINUTE)),
            page((92..96).rev().map(|m| m * MINUTE)),
            page([91 * MINUTE]),
        ]);

        let candles = run_pagination(&protocol(), &fetcher, &settings(4), "ETH-USDT-SWAP", &window(0, 100))
            .await
            .unwrap();

        let afters: Vec<String> = fetcher
            .requests()
            .iter()
            .map(|r| r.get("after").unwrap().to_string())
            .collect();
        assert_eq!(afters, vec!["6000000", "5760000", "5520000"]);

        // 保持交易所的新在前顺序，由存储层排序
        let ts: Vec<i64> = candles.iter().map(|c| c.timestamp).collect();
        assert_eq!(ts.first(), Some(&(99 * MINUTE)));
        assert_eq!(ts.last(), Some(&(91 * MINUTE)));
        assert_eq!(ts.len(), 9);
    }

    #[tokio::test]
    async fn test_stops_once_start_is_reached() {
        let fetcher = ScriptedFetcher::new(vec![
            page((96..100).rev().map(|m| m * MINUTE)),
            page((92..96).rev().map(|m| m * MINUTE)),
        ]);

        let candles = run_pagination(&protocol(), &fetcher, &settings(4), "ETH-USDT-SWAP", &window(93, 100))
            .await
            .unwrap();

        assert_eq!(fetcher.requests().len(), 2);
        assert_eq!(candles.len(), 8);
    }

    #[test]
    fn test_range_exhausted_rules() {
        let p = protocol();
        let w = window(50, 100);
        let candle = |m: i64| Candle::new(m * MINUTE, Default::default(), Default::default(), Default::default(), Default::default());

        assert!(!p.range_exhausted(&(100 * MINUTE), &[candle(99), candle(60)], &w));
        assert!(p.range_exhausted(&(100 * MINUTE), &[candle(99), candle(50)], &w));
        assert!(p.range_exhausted(&(50 * MINUTE), &[candle(49)], &w));
    }

    #[test]
    fn test_stalled_cursor_rejected() {
        let p = protocol();
        let w = window(0, 100);
        let candle = Candle::new(100 * MINUTE, Default::default(), Default::default(), Default::default(), Default::default());

        let err = p.advance(&(100 * MINUTE), &[candle], &w).unwrap_err();
        assert!(matches!(err, AppError::PaginationError(_)));
    }

    #[test]
    fn test_error_code_rejected() {
        let err = protocol()
            .parse_page("BTC-USDT-SWAP", &json!({"code": "50011", "msg": "Too Many Requests", "data": []}))
            .unwrap_err();
        assert!(err.to_string().contains("50011"));
    }
}
