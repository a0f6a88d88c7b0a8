//! 集成测试共用的脚本化上游
#![allow(dead_code)]

use ohlcv_harvester::klcommon::{AppError, HarvesterConfig, JsonFetcher, PageRequest, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

/// 按URL前缀路由的脚本化上游，记录所有请求
#[derive(Default)]
pub struct RoutedFetcher {
    routes: Mutex<Vec<(String, VecDeque<Result<Value>>)>>,
    panic_prefixes: Vec<String>,
    requests: Mutex<Vec<PageRequest>>,
}

impl RoutedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某个URL前缀追加一串响应，按顺序返回
    pub fn route(self, prefix: &str, responses: Vec<Value>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), responses.into_iter().map(Ok).collect()));
        self
    }

    pub fn route_error(self, prefix: &str, err: AppError) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), VecDeque::from(vec![Err(err)])));
        self
    }

    /// 请求该前缀时直接 panic，模拟任务异常退出
    pub fn panic_on(mut self, prefix: &str) -> Self {
        self.panic_prefixes.push(prefix.to_string());
        self
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<PageRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl JsonFetcher for RoutedFetcher {
    async fn get_json(&self, request: &PageRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());

        if self.panic_prefixes.iter().any(|p| request.url.starts_with(p.as_str())) {
            panic!("脚本化上游: {} 模拟崩溃", request.url);
        }

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .iter_mut()
            .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
            .map(|(_, queue)| queue);

        match queue.and_then(VecDeque::pop_front) {
            Some(response) => response,
            None => Err(AppError::ApiError(format!("没有为 {} 预设响应", request.url))),
        }
    }
}

/// 四个交易所都指向假地址的测试配置，翻页和品种间不等待
pub fn test_config(data_dir: &Path, exchanges: &[&str]) -> HarvesterConfig {
    let list = exchanges
        .iter()
        .map(|e| format!("\"{}\"", e))
        .collect::<Vec<_>>()
        .join(", ");

    let content = format!(
        r#"
        [session]
        exchanges = [{list}]
        data_dir = "{data}"
        catalog_path = "{data}/all_tickers.csv"
        since_num_days_before = 1

        [http]
        max_retries = 0

        [exchanges.okx]
        ticker_endpoint = "http://okx.test/instruments?instType=SWAP"
        ohlc_endpoint = "http://okx.test/candles"
        interval = "1m"
        max_page_size = 4
        page_delay_ms = 0
        symbol_delay_ms = 0

        [exchanges.bybit]
        ticker_endpoint = "http://bybit.test/instruments"
        ohlc_endpoint = "http://bybit.test/kline"
        interval = "1"
        max_page_size = 4
        page_delay_ms = 0
        symbol_delay_ms = 0
        category = "linear"

        [exchanges.dydx]
        ticker_endpoint = "http://dydx.test/markets"
        ohlc_endpoint = "http://dydx.test/candles/"
        interval = "1MIN"
        max_page_size = 4
        page_delay_ms = 0
        symbol_delay_ms = 0

        [exchanges.apexpro]
        ticker_endpoint = "http://apex.test/symbols"
        ohlc_endpoint = "http://apex.test/klines"
        interval = "1"
        max_page_size = 4
        page_delay_ms = 0
        symbol_delay_ms = 0
        "#,
        list = list,
        data = data_dir.display().to_string().replace('\\', "/"),
    );

    HarvesterConfig::from_toml_str(&content).expect("测试配置无效")
}

pub fn okx_instruments(inst_ids: &[&str]) -> Value {
    let data: Vec<Value> = inst_ids
        .iter()
        .map(|id| {
            let base = id.split('-').next().unwrap_or_default();
            json!({"instId": id, "instType": "SWAP", "ctType": "linear", "ctValCcy": base, "settleCcy": "USDT", "state": "live"})
        })
        .collect();
    json!({"code": "0", "msg": "", "data": data})
}

pub fn bybit_instruments(symbols: &[(&str, &str, &str)]) -> Value {
    let list: Vec<Value> = symbols
        .iter()
        .map(|(symbol, base, quote)| {
            json!({"symbol": symbol, "contractType": "LinearPerpetual", "status": "Trading", "baseCoin": base, "quoteCoin": quote})
        })
        .collect();
    json!({"retCode": 0, "retMsg": "OK", "result": {"category": "linear", "list": list}})
}

/// Bybit K线响应，输入按时间升序，输出为交易所的新在前顺序
pub fn bybit_kline(timestamps: &[i64]) -> Value {
    let list: Vec<Value> = timestamps
        .iter()
        .rev()
        .map(|ts| json!([ts.to_string(), "100.5", "101", "99.5", "100.25", "12", "1200"]))
        .collect();
    json!({"retCode": 0, "retMsg": "OK", "result": {"category": "linear", "list": list}})
}

/// OKX K线响应，输入按时间降序
pub fn okx_candles(timestamps: &[i64]) -> Value {
    let data: Vec<Value> = timestamps
        .iter()
        .map(|ts| json!([ts.to_string(), "26502.6", "26533.2", "26279", "26454.5", "1193839"]))
        .collect();
    json!({"code": "0", "msg": "", "data": data})
}
