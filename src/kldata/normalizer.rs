//! K线标准化
//!
//! 每个交易所一个纯函数，把单条原始记录转换为 [`Candle`]。
//! 缺少字段或数字无法解析时返回 [`AppError::ParseError`]，不使用默认值

use crate::klcommon::{AppError, Candle, ExchangeId, Result};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// 解析十进制价格，接受字符串或JSON数字
fn parse_decimal(exchange: ExchangeId, field: &str, value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(AppError::ParseError(format!(
                "{}: 字段 {} 不是数字: {}",
                exchange, field, other
            )))
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| {
            AppError::ParseError(format!(
                "{}: 字段 {} 无法解析为数字 '{}': {}",
                exchange, field, text, e
            ))
        })
}

/// 解析毫秒时间戳，接受字符串或整数
fn parse_millis(exchange: ExchangeId, field: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        AppError::ParseError(format!(
            "{}: 字段 {} 不是有效的毫秒时间戳: {}",
            exchange, field, value
        ))
    })
}

/// 取数组形式记录的第 `index` 个元素
fn array_field<'a>(exchange: ExchangeId, record: &'a Value, index: usize, field: &str) -> Result<&'a Value> {
    let items = record.as_array().ok_or_else(|| {
        AppError::ParseError(format!("{}: K线记录不是数组: {}", exchange, record))
    })?;

    items.get(index).ok_or_else(|| {
        AppError::ParseError(format!(
            "{}: K线记录缺少字段 {} (下标 {})",
            exchange, field, index
        ))
    })
}

/// 取对象形式记录的字段
fn object_field<'a>(exchange: ExchangeId, record: &'a Value, field: &str) -> Result<&'a Value> {
    let object = record.as_object().ok_or_else(|| {
        AppError::ParseError(format!("{}: K线记录不是对象: {}", exchange, record))
    })?;

    object
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::ParseError(format!("{}: K线记录缺少字段 {}", exchange, field)))
}

/// `[ts, o, h, l, c, ...]` 形式的数组记录，OKX 和 Bybit 共用
fn normalize_array_record(exchange: ExchangeId, record: &Value) -> Result<Candle> {
    let timestamp = parse_millis(exchange, "ts", array_field(exchange, record, 0, "ts")?)?;
    let open = parse_decimal(exchange, "open", array_field(exchange, record, 1, "open")?)?;
    let high = parse_decimal(exchange, "high", array_field(exchange, record, 2, "high")?)?;
    let low = parse_decimal(exchange, "low", array_field(exchange, record, 3, "low")?)?;
    let close = parse_decimal(exchange, "close", array_field(exchange, record, 4, "close")?)?;

    Ok(Candle::new(timestamp, open, high, low, close))
}

/// OKX: `["1686276000000", "26502.6", "26533.2", "26279", "26454.5", ...]`
pub fn normalize_okx(record: &Value) -> Result<Candle> {
    normalize_array_record(ExchangeId::Okx, record)
}

/// Bybit: `["1685765160000", "1898.55", "1898.55", "1898.5", "1898.55", "508", ...]`
pub fn normalize_bybit(record: &Value) -> Result<Candle> {
    normalize_array_record(ExchangeId::Bybit, record)
}

/// dYdX: `{"startedAt": "2023-06-14T05:00:00.000Z", "open": "25981", ...}`
///
/// `startedAt` 为 RFC 3339 时间，转换为毫秒
pub fn normalize_dydx(record: &Value) -> Result<Candle> {
    let exchange = ExchangeId::Dydx;

    let started_at = object_field(exchange, record, "startedAt")?;
    let text = started_at.as_str().ok_or_else(|| {
        AppError::ParseError(format!("{}: 字段 startedAt 不是字符串: {}", exchange, started_at))
    })?;
    let timestamp = DateTime::parse_from_rfc3339(text)
        .map_err(|e| {
            AppError::ParseError(format!(
                "{}: 字段 startedAt 时间格式错误 '{}': {}",
                exchange, text, e
            ))
        })?
        .timestamp_millis();

    Ok(Candle::new(
        timestamp,
        parse_decimal(exchange, "open", object_field(exchange, record, "open")?)?,
        parse_decimal(exchange, "high", object_field(exchange, record, "high")?)?,
        parse_decimal(exchange, "low", object_field(exchange, record, "low")?)?,
        parse_decimal(exchange, "close", object_field(exchange, record, "close")?)?,
    ))
}

/// ApeX Pro: `{"t": 1686792300000, "o": "25150", "h": "25151.5", "l": "25137", "c": "25142.5", ...}`
pub fn normalize_apexpro(record: &Value) -> Result<Candle> {
    let exchange = ExchangeId::ApexPro;

    Ok(Candle::new(
        parse_millis(exchange, "t", object_field(exchange, record, "t")?)?,
        parse_decimal(exchange, "o", object_field(exchange, record, "o")?)?,
        parse_decimal(exchange, "h", object_field(exchange, record, "h")?)?,
        parse_decimal(exchange, "l", object_field(exchange, record, "l")?)?,
        parse_decimal(exchange, "c", object_field(exchange, record, "c")?)?,
    ))
}

/// 按交易所选择标准化函数
pub fn normalize(exchange: ExchangeId, record: &Value) -> Result<Candle> {
    match exchange {
        ExchangeId::Okx => normalize_okx(record),
        ExchangeId::Bybit => normalize_bybit(record),
        ExchangeId::Dydx => normalize_dydx(record),
        ExchangeId::ApexPro => normalize_apexpro(record),
    }
}

/// 标准化一整页记录，任何一条失败则整页失败
pub fn normalize_all(exchange: ExchangeId, records: &[Value]) -> Result<Vec<Candle>> {
    records.iter().map(|record| normalize(exchange, record)).collect()
}
