use crate::klcommon::error::AppError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 一根分钟K线的毫秒数
pub const ONE_MINUTE_MS: i64 = 60_000;

/// 支持的交易所
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Okx,
    Bybit,
    Dydx,
    ApexPro,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 4] = [
        ExchangeId::Okx,
        ExchangeId::Bybit,
        ExchangeId::Dydx,
        ExchangeId::ApexPro,
    ];

    /// 配置键和文件名中使用的小写名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Okx => "okx",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Dydx => "dydx",
            ExchangeId::ApexPro => "apexpro",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "okx" => Ok(ExchangeId::Okx),
            "bybit" => Ok(ExchangeId::Bybit),
            "dydx" => Ok(ExchangeId::Dydx),
            "apexpro" => Ok(ExchangeId::ApexPro),
            other => Err(AppError::ConfigError(format!("未知的交易所: {}", other))),
        }
    }
}

/// 标准化后的K线，所有交易所统一为这一格式
///
/// `timestamp` 为K线开盘时间（UTC毫秒），价格保留交易所返回的原始精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
}

impl Candle {
    pub fn new(timestamp: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }
}

/// 可交易品种
///
/// 每个会话由品种目录生成一次，之后只读。(exchange, symbol) 唯一
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub exchange: ExchangeId,
    /// 交易所原生的交易对名称，例如 "BTC-USDT-SWAP"
    pub symbol: String,
    pub base: String,
    pub quote: String,
    #[serde(rename = "type")]
    pub instrument_type: String,
}

impl Symbol {
    pub fn new(
        exchange: ExchangeId,
        symbol: impl Into<String>,
        base: impl Into<String>,
        quote: impl Into<String>,
        instrument_type: impl Into<String>,
    ) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            base: base.into(),
            quote: quote.into(),
            instrument_type: instrument_type.into(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} ({}-{})", self.exchange, self.symbol, self.base, self.quote)
    }
}

/// 单个品种一次下载的时间范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadWindow {
    /// 起始时间（毫秒，包含）
    pub start_ts: i64,
    /// 目标上界（毫秒），通常是会话开始时的当前时间
    pub end_ts: i64,
    /// K线周期（毫秒）
    pub bar_interval_ms: i64,
}

/// 单个品种的下载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// 首次下载，新建了数据文件
    Downloaded { records: usize },
    /// 在已有数据文件上追加
    Updated { records: usize },
    /// 已是最新，没有发出任何请求
    UpToDate,
    /// 请求成功但没有新K线
    NoNewData,
    /// 本次会话放弃该品种，下次运行时重试
    Failed { reason: String },
}

impl SymbolOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolOutcome::Downloaded { .. } => "downloaded",
            SymbolOutcome::Updated { .. } => "updated",
            SymbolOutcome::UpToDate => "up_to_date",
            SymbolOutcome::NoNewData => "no_new_data",
            SymbolOutcome::Failed { .. } => "failed",
        }
    }

    /// 实际落盘的K线条数
    pub fn records(&self) -> usize {
        match self {
            SymbolOutcome::Downloaded { records } | SymbolOutcome::Updated { records } => *records,
            _ => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SymbolOutcome::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_id_round_trip_names() {
        for exchange in ExchangeId::ALL {
            assert_eq!(exchange.as_str().parse::<ExchangeId>().unwrap(), exchange);
        }
        assert_eq!(" OKX ".parse::<ExchangeId>().unwrap(), ExchangeId::Okx);
        assert!("binance".parse::<ExchangeId>().is_err());
    }

    #[test]
    fn test_symbol_display() {
        let symbol = Symbol::new(ExchangeId::Okx, "BTC-USDT-SWAP", "BTC", "USDT", "SWAP");
        assert_eq!(symbol.to_string(), "okx-BTC-USDT-SWAP (BTC-USDT)");
    }

    #[test]
    fn test_outcome_records_only_for_persisted() {
        assert_eq!(SymbolOutcome::Updated { records: 3 }.records(), 3);
        assert_eq!(SymbolOutcome::NoNewData.records(), 0);
        assert!(SymbolOutcome::Failed { reason: "x".into() }.is_failure());
    }
}
