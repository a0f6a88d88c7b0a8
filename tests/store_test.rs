//! CSV 存储的集成测试：合并去重、幂等、连续性

use ohlcv_harvester::klcommon::{Candle, ExchangeId};
use ohlcv_harvester::kldata::continuity::{find_gaps, SpacingViolation};
use ohlcv_harvester::kldata::CsvStore;
use rust_decimal::Decimal;
use std::fs;
use std::str::FromStr;
use tempfile::TempDir;

const BAR: i64 = 60_000;

fn candle(ts: i64, close: &str) -> Candle {
    let open = Decimal::from_str("100.5").unwrap();
    Candle::new(ts, open, open, open, Decimal::from_str(close).unwrap())
}

fn timestamps(store: &CsvStore) -> Vec<i64> {
    store
        .read_series(ExchangeId::Okx, "BTC", "USDT")
        .unwrap()
        .iter()
        .map(|c| c.timestamp)
        .collect()
}

#[test]
fn test_overlapping_merge_collapses_duplicates() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));

    let existing = [candle(1_000_000, "1"), candle(2_000_000, "2"), candle(3_000_000, "3")];
    store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &existing, 1_000_000)
        .unwrap();

    let new = [candle(2_000_000, "20"), candle(3_000_000, "30"), candle(4_000_000, "40")];
    let report = store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &new, 1_000_000)
        .unwrap();

    // len(existing) + len(new) - k
    assert_eq!(report.existing_rows, 3);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.total_rows, 4);
    assert!(!report.created);
    assert!(!report.fallback);
    assert!(report.violations.is_empty());

    let series = store.read_series(ExchangeId::Okx, "BTC", "USDT").unwrap();
    assert_eq!(
        series.iter().map(|c| c.timestamp).collect::<Vec<_>>(),
        vec![1_000_000, 2_000_000, 3_000_000, 4_000_000]
    );
    // 重复时间戳保留新值
    assert_eq!(series[1].close, Decimal::from_str("20").unwrap());
    assert_eq!(series[2].close, Decimal::from_str("30").unwrap());
}

#[test]
fn test_merge_is_idempotent_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));
    let candles = [
        candle(3 * BAR, "26454.50"),
        candle(BAR, "26502.6"),
        candle(2 * BAR, "0.00100"),
    ];

    store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &candles, BAR)
        .unwrap();
    let path = store.series_path(ExchangeId::Okx, "BTC", "USDT");
    let first = fs::read(&path).unwrap();

    store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &candles, BAR)
        .unwrap();
    let second = fs::read(&path).unwrap();

    assert_eq!(first, second);
    assert_eq!(timestamps(&store), vec![BAR, 2 * BAR, 3 * BAR]);
}

#[test]
fn test_out_of_order_input_persisted_ascending() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));

    // OKX 的页面新的在前
    let newest_first: Vec<Candle> = (0..5).rev().map(|i| candle(i * BAR, "1")).collect();
    let report = store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &newest_first, BAR)
        .unwrap();

    assert!(report.created);
    let ts = timestamps(&store);
    assert!(ts.windows(2).all(|w| w[1] > w[0]));
    assert!(find_gaps(&ts, BAR).is_empty());
}

#[test]
fn test_merge_reports_preexisting_gap_without_hiding_it() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));

    store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &[candle(0, "1"), candle(BAR, "1")], BAR)
        .unwrap();
    let report = store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &[candle(4 * BAR, "1"), candle(5 * BAR, "1")], BAR)
        .unwrap();

    assert_eq!(
        report.violations,
        vec![SpacingViolation::Gap {
            start_time: 2 * BAR,
            end_time: 3 * BAR,
            missing_periods: 2,
        }]
    );
    assert_eq!(report.total_rows, 4);
}

#[test]
fn test_series_files_are_separate_per_pair() {
    let dir = TempDir::new().unwrap();
    let store = CsvStore::new(dir.path(), dir.path().join("all_tickers.csv"));

    store
        .merge_and_persist(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", &[candle(BAR, "1")], BAR)
        .unwrap();
    store
        .merge_and_persist(ExchangeId::ApexPro, "BTCUSDC", "BTC", "USDC", &[candle(2 * BAR, "1")], BAR)
        .unwrap();

    assert!(dir.path().join("okx-BTC-USDT.csv").is_file());
    assert!(dir.path().join("apexpro-BTC-USDC.csv").is_file());
    assert_eq!(store.get_last_timestamp(ExchangeId::ApexPro, "BTC", "USDC").unwrap(), Some(2 * BAR));
    assert_eq!(store.get_last_timestamp(ExchangeId::Okx, "ETH", "USDT").unwrap(), None);
}
