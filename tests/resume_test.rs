//! 续传点与存储读契约的集成测试

use ohlcv_harvester::klcommon::{Candle, ExchangeId};
use ohlcv_harvester::kldata::resume::is_up_to_date;
use ohlcv_harvester::kldata::{CsvStore, ResumePointResolver};
use rust_decimal::Decimal;
use tempfile::TempDir;

const BAR: i64 = 60_000;

fn candle(ts: i64) -> Candle {
    Candle::new(ts, Decimal::TEN, Decimal::TEN, Decimal::TEN, Decimal::TEN)
}

#[test]
fn test_resume_then_merge_scenario() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));
    store
        .merge_and_persist(ExchangeId::Bybit, "BTCUSDT", "BTC", "USDT", &[candle(1_000_000)], BAR)
        .unwrap();

    let start = ResumePointResolver::new(&store)
        .resolve(ExchangeId::Bybit, "BTC", "USDT", 0, BAR)
        .unwrap();
    assert_eq!(start, 1_060_000);

    let fetched = [candle(1_060_000), candle(1_120_000), candle(1_180_000)];
    let report = store
        .merge_and_persist(ExchangeId::Bybit, "BTCUSDT", "BTC", "USDT", &fetched, BAR)
        .unwrap();

    assert_eq!(report.total_rows, 4);
    assert!(report.violations.is_empty());
    assert_eq!(store.get_last_timestamp(ExchangeId::Bybit, "BTC", "USDT").unwrap(), Some(1_180_000));
}

#[test]
fn test_resume_uses_bar_interval() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));
    let hour = 60 * BAR;
    store
        .merge_and_persist(ExchangeId::Dydx, "BTC-USD", "BTC", "USD", &[candle(hour), candle(2 * hour)], hour)
        .unwrap();

    let resolver = ResumePointResolver::new(&store);
    assert_eq!(resolver.resolve(ExchangeId::Dydx, "BTC", "USD", 0, hour).unwrap(), 3 * hour);
    assert_eq!(resolver.resolve(ExchangeId::Dydx, "ETH", "USD", 42, hour).unwrap(), 42);
}

#[test]
fn test_unreadable_series_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));
    std::fs::write(
        store.series_path(ExchangeId::Okx, "BTC", "USDT"),
        "timestamp,open,high,low,close\nyesterday,1,1,1,1\n",
    )
    .unwrap();

    assert!(ResumePointResolver::new(&store)
        .resolve(ExchangeId::Okx, "BTC", "USDT", 0, BAR)
        .is_err());
}

#[test]
fn test_up_to_date_when_resume_reaches_till() {
    assert!(is_up_to_date(1_060_000, 1_060_000));
    assert!(!is_up_to_date(1_060_000, 1_060_001));
}
