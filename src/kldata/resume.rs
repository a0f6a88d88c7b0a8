//! 续传点计算
//!
//! 根据已持久化的最后一根K线决定本次下载从哪里开始，只读不写

use crate::kldata::store::CsvStore;
use crate::klcommon::{ExchangeId, Result};
use tracing::debug;

/// 续传点解析器
#[derive(Debug, Clone, Copy)]
pub struct ResumePointResolver<'a> {
    store: &'a CsvStore,
}

impl<'a> ResumePointResolver<'a> {
    pub fn new(store: &'a CsvStore) -> Self {
        Self { store }
    }

    /// 计算起始时间戳（毫秒）
    ///
    /// 没有历史数据时返回 `configured_since`，否则返回最后时间戳加一个周期，
    /// 避免重复下载最后一根已存储的K线
    pub fn resolve(
        &self,
        exchange: ExchangeId,
        base: &str,
        quote: &str,
        configured_since: i64,
        bar_interval_ms: i64,
    ) -> Result<i64> {
        let start = match self.store.get_last_timestamp(exchange, base, quote)? {
            Some(last) => last + bar_interval_ms,
            None => configured_since,
        };

        debug!(target: "orchestrator", %exchange, base, quote, start, "续传起点");
        Ok(start)
    }
}

/// 起点不早于目标上界时视为已是最新，不发出任何请求
pub fn is_up_to_date(start_ts: i64, till_ts: i64) -> bool {
    start_ts >= till_ts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klcommon::Candle;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_without_history_uses_since() {
        let dir = TempDir::new().unwrap();
        let store = CsvStore::new(dir.path(), dir.path().join("tickers.csv"));

        let start = ResumePointResolver::new(&store)
            .resolve(ExchangeId::Okx, "BTC", "USDT", 123_000, 60_000)
            .unwrap();
        assert_eq!(start, 123_000);
    }

    #[test]
    fn test_resolve_with_history_steps_one_bar() {
        let dir = TempDir::new().unwrap();
        let store = CsvStore::new(dir.path(), dir.path().join("tickers.csv"));
        let candle = Candle::new(1_000_000, Decimal::ONE, Decimal::ONE, Decimal::ONE, Decimal::ONE);
        store
            .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &[candle], 60_000)
            .unwrap();

        let start = ResumePointResolver::new(&store)
            .resolve(ExchangeId::Okx, "BTC", "USDT", 0, 60_000)
            .unwrap();
        assert_eq!(start, 1_060_000);
    }

    #[test]
    fn test_is_up_to_date_boundary() {
        assert!(is_up_to_date(100, 100));
        assert!(is_up_to_date(101, 100));
        assert!(!is_up_to_date(99, 100));
    }
}
