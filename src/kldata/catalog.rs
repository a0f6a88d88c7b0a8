//! 品种目录
//!
//! 每个会话开始时从各交易所的品种列表端点拉取一次，过滤出可交易的线性/永续合约，
//! 转换为统一的 [`Symbol`]。之后由编排器持有，只读使用

use crate::klcommon::{AppError, ExchangeConfig, ExchangeId, JsonFetcher, PageRequest, Result, Symbol};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxInstrument {
    inst_id: String,
    inst_type: String,
    ct_type: String,
    ct_val_ccy: String,
    settle_ccy: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitInstrument {
    symbol: String,
    contract_type: String,
    status: String,
    base_coin: String,
    quote_coin: String,
}

/// v3 使用 `market` + ONLINE，v4 使用 `ticker` + ACTIVE
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DydxMarket {
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    market: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    base_asset: Option<String>,
    #[serde(default)]
    quote_asset: Option<String>,
    #[serde(default, rename = "type")]
    market_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApexContract {
    cross_symbol_name: String,
    underlying_currency_id: String,
    settle_currency_id: String,
    #[serde(default)]
    enable_trade: bool,
}

fn envelope_error(exchange: ExchangeId, detail: &str) -> AppError {
    AppError::MalformedResponse {
        exchange,
        detail: detail.to_string(),
    }
}

/// 逐条反序列化，单条格式不对时跳过并告警
fn deserialize_items<T: DeserializeOwned>(exchange: ExchangeId, items: &[Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(target: "catalog", %exchange, error = %e, "跳过无法解析的品种记录");
                None
            }
        })
        .collect()
}

fn items_at<'a>(exchange: ExchangeId, response: &'a Value, pointer: &str) -> Result<&'a Vec<Value>> {
    response
        .pointer(pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| envelope_error(exchange, &format!("品种列表缺少 {}", pointer)))
}

/// OKX: `ctType == linear` 且 `state == live`
pub fn parse_okx_instruments(response: &Value) -> Result<Vec<Symbol>> {
    let exchange = ExchangeId::Okx;
    let items = items_at(exchange, response, "/data")?;

    Ok(deserialize_items::<OkxInstrument>(exchange, items)
        .into_iter()
        .filter(|i| i.ct_type == "linear" && i.state == "live")
        .map(|i| Symbol::new(exchange, i.inst_id, i.ct_val_ccy, i.settle_ccy, i.inst_type))
        .collect())
}

/// Bybit: `status == Trading`
pub fn parse_bybit_instruments(response: &Value) -> Result<Vec<Symbol>> {
    let exchange = ExchangeId::Bybit;
    let items = items_at(exchange, response, "/result/list")?;

    Ok(deserialize_items::<BybitInstrument>(exchange, items)
        .into_iter()
        .filter(|i| i.status == "Trading")
        .map(|i| Symbol::new(exchange, i.symbol, i.base_coin, i.quote_coin, i.contract_type))
        .collect())
}

/// dYdX: `status` 为 ONLINE 或 ACTIVE
///
/// 缺少 baseAsset/quoteAsset 时从市场键（如 "BTC-USD"）拆分
pub fn parse_dydx_instruments(response: &Value) -> Result<Vec<Symbol>> {
    let exchange = ExchangeId::Dydx;
    let markets = response
        .get("markets")
        .and_then(Value::as_object)
        .ok_or_else(|| envelope_error(exchange, "品种列表缺少 markets"))?;

    let mut symbols = Vec::new();
    for (key, details) in markets {
        let market = match DydxMarket::deserialize(details) {
            Ok(market) => market,
            Err(e) => {
                warn!(target: "catalog", %exchange, market = %key, error = %e, "跳过无法解析的市场");
                continue;
            }
        };

        if !matches!(market.status.as_deref(), Some("ONLINE") | Some("ACTIVE")) {
            continue;
        }

        let mut parts = key.splitn(2, '-');
        let (key_base, key_quote) = (parts.next(), parts.next());

        let base = market.base_asset.or_else(|| key_base.map(str::to_string));
        let quote = market.quote_asset.or_else(|| key_quote.map(str::to_string));
        let (base, quote) = match (base, quote) {
            (Some(base), Some(quote)) if !base.is_empty() && !quote.is_empty() => (base, quote),
            _ => {
                warn!(target: "catalog", %exchange, market = %key, "无法确定基础币/计价币，跳过");
                continue;
            }
        };

        let name = market.ticker.or(market.market).unwrap_or_else(|| key.clone());
        let market_type = market.market_type.unwrap_or_else(|| "PERPETUAL".to_string());
        symbols.push(Symbol::new(exchange, name, base, quote, market_type));
    }

    Ok(symbols)
}

/// ApeX Pro: `data.perpetualContract` 中 `enableTrade` 为真的合约
pub fn parse_apexpro_instruments(response: &Value) -> Result<Vec<Symbol>> {
    let exchange = ExchangeId::ApexPro;
    let items = items_at(exchange, response, "/data/perpetualContract")?;

    Ok(deserialize_items::<ApexContract>(exchange, items)
        .into_iter()
        .filter(|c| c.enable_trade)
        .map(|c| {
            Symbol::new(
                exchange,
                c.cross_symbol_name,
                c.underlying_currency_id,
                c.settle_currency_id,
                "perpetualContract",
            )
        })
        .collect())
}

/// 按交易所选择品种列表的解析函数
pub fn parse_instruments(exchange: ExchangeId, response: &Value) -> Result<Vec<Symbol>> {
    match exchange {
        ExchangeId::Okx => parse_okx_instruments(response),
        ExchangeId::Bybit => parse_bybit_instruments(response),
        ExchangeId::Dydx => parse_dydx_instruments(response),
        ExchangeId::ApexPro => parse_apexpro_instruments(response),
    }
}

/// 拉取一个交易所的品种列表，按配置的白名单过滤
#[instrument(target = "catalog", skip(fetcher, config))]
pub async fn fetch_symbols<F: JsonFetcher>(
    fetcher: &F,
    exchange: ExchangeId,
    config: &ExchangeConfig,
) -> Result<Vec<Symbol>> {
    let response = fetcher
        .get_json(&PageRequest::new(&config.ticker_endpoint))
        .await?;

    let symbols: Vec<Symbol> = parse_instruments(exchange, &response)?
        .into_iter()
        .filter(|s| config.allows_symbol(&s.symbol))
        .collect();

    info!(target: "catalog", %exchange, count = symbols.len(), "品种列表下载完成");
    Ok(symbols)
}

/// 本次会话的品种目录
#[derive(Debug, Default)]
pub struct SymbolCatalog {
    inner: RwLock<BTreeMap<ExchangeId, Vec<Symbol>>>,
}

impl SymbolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换某个交易所的品种列表，按品种名去重（保留先出现的），返回保留的数量
    pub async fn replace_exchange(&self, exchange: ExchangeId, symbols: Vec<Symbol>) -> usize {
        let mut seen = HashSet::new();
        let unique: Vec<Symbol> = symbols
            .into_iter()
            .filter(|s| s.exchange == exchange && seen.insert(s.symbol.clone()))
            .collect();

        let count = unique.len();
        self.inner.write().await.insert(exchange, unique);
        count
    }

    pub async fn get_symbols(&self, exchange: ExchangeId) -> Vec<Symbol> {
        self.inner
            .read()
            .await
            .get(&exchange)
            .cloned()
            .unwrap_or_default()
    }

    /// 所有交易所的品种，按交易所顺序排列
    pub async fn all(&self) -> Vec<Symbol> {
        self.inner.read().await.values().flatten().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
