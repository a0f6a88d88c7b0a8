//! 分页下载引擎
//!
//! 每个交易所实现一个 [`PageProtocol`]：请求参数怎么拼、响应怎么解析、
//! 游标怎么前进、什么时候到达区间末尾。[`run_pagination`] 是所有交易所共用的循环：
//!
//! 1. 按当前游标发请求
//! 2. 解析响应；数据包格式不对立即放弃整个品种，已累积的K线全部丢弃
//! 3. 按交易所的自然顺序追加本页K线
//! 4. 短页或区间耗尽时结束，否则前进游标
//! 5. 两次请求之间等待固定间隔

pub mod apexpro;
pub mod bybit;
pub mod dydx;
pub mod okx;

pub use apexpro::{ApexProProtocol, ApexWindow};
pub use bybit::BybitProtocol;
pub use dydx::DydxProtocol;
pub use okx::OkxProtocol;

use crate::klcommon::api::preview;
use crate::klcommon::{
    AppError, Candle, DownloadWindow, ExchangeConfig, ExchangeId, JsonFetcher, PageRequest, Result,
};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// 单个交易所的分页协议
pub trait PageProtocol: Send + Sync {
    /// 分页游标
    type Cursor: Copy + fmt::Debug + PartialEq + Send + Sync;

    fn exchange(&self) -> ExchangeId;

    /// 由下载范围得到第一个游标
    fn initial_cursor(&self, window: &DownloadWindow) -> Self::Cursor;

    /// 按游标构造请求
    fn request(&self, symbol: &str, cursor: &Self::Cursor, window: &DownloadWindow) -> Result<PageRequest>;

    /// 校验数据包并标准化本页记录，按交易所的自然累积顺序返回
    fn parse_page(&self, symbol: &str, response: &Value) -> Result<Vec<Candle>>;

    /// 本页之后是否已覆盖到下载范围的边界
    fn range_exhausted(&self, cursor: &Self::Cursor, page: &[Candle], window: &DownloadWindow) -> bool;

    /// 计算下一个游标；游标没有朝预期方向前进时返回 [`AppError::PaginationError`]
    fn advance(&self, cursor: &Self::Cursor, page: &[Candle], window: &DownloadWindow) -> Result<Self::Cursor>;
}

/// 分页循环的参数
#[derive(Debug, Clone)]
pub struct PaginationSettings {
    /// 交易所单次最多返回的条数
    pub max_page_size: usize,
    /// 本页条数低于 `short_page_ratio * max_page_size` 时视为最后一页
    pub short_page_ratio: f64,
    /// 两次请求之间的等待
    pub page_delay: Duration,
    /// 零条记录的页面是否视为格式错误
    pub empty_page_is_error: bool,
    /// 页数上限
    pub max_pages: usize,
}

impl PaginationSettings {
    pub fn from_config(exchange: ExchangeId, config: &ExchangeConfig) -> Self {
        Self {
            max_page_size: config.max_page_size,
            short_page_ratio: config.short_page_ratio,
            page_delay: config.page_delay(),
            empty_page_is_error: config.empty_page_is_error(exchange),
            max_pages: config.max_pages,
        }
    }

    pub fn is_short_page(&self, page_len: usize) -> bool {
        (page_len as f64) < self.short_page_ratio * self.max_page_size as f64
    }
}

/// 游标必须朝预期方向前进，否则分页会死循环
pub(crate) fn ensure_progress<T: PartialOrd + fmt::Debug>(
    exchange: ExchangeId,
    current: T,
    next: T,
    forward: bool,
) -> Result<T> {
    let progressed = if forward { next > current } else { next < current };
    if progressed {
        Ok(next)
    } else {
        Err(AppError::PaginationError(format!(
            "{}: 游标没有前进 {:?} -> {:?}",
            exchange, current, next
        )))
    }
}

/// 从JSON中取出数组字段，缺失时返回解析错误
pub(crate) fn require_array<'a>(value: Option<&'a Value>, what: &str) -> Result<&'a Vec<Value>> {
    value
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::ParseError(format!("响应中缺少 {} 数组", what)))
}

/// 驱动一个品种的完整分页下载
///
/// 任意一页失败都返回错误，已累积的K线不会交给调用方
pub async fn run_pagination<P, F>(
    protocol: &P,
    fetcher: &F,
    settings: &PaginationSettings,
    symbol: &str,
    window: &DownloadWindow,
) -> Result<Vec<Candle>>
where
    P: PageProtocol,
    F: JsonFetcher,
{
    let exchange = protocol.exchange();
    let mut cursor = protocol.initial_cursor(window);
    let mut accumulated: Vec<Candle> = Vec::new();
    let mut pages = 0usize;

    loop {
        if pages > 0 && !settings.page_delay.is_zero() {
            tokio::time::sleep(settings.page_delay).await;
        }

        let request = protocol.request(symbol, &cursor, window)?;
        let response = fetcher.get_json(&request).await?;
        pages += 1;

        let page = match protocol.parse_page(symbol, &response) {
            Ok(page) => page,
            Err(e) => {
                let err = e.into_malformed(exchange);
                error!(
                    target: "pagination",
                    %exchange,
                    symbol,
                    page = pages,
                    discarded = accumulated.len(),
                    response = %preview(&response.to_string()),
                    "响应格式不符合预期，放弃该品种: {}", err
                );
                return Err(err);
            }
        };

        if page.is_empty() && settings.empty_page_is_error {
            error!(
                target: "pagination",
                %exchange,
                symbol,
                page = pages,
                discarded = accumulated.len(),
                response = %preview(&response.to_string()),
                "收到空页面，放弃该品种"
            );
            return Err(AppError::MalformedResponse {
                exchange,
                detail: format!("{} 第{}页没有任何记录", symbol, pages),
            });
        }

        let page_len = page.len();
        accumulated.extend_from_slice(&page);
        debug!(target: "pagination", %exchange, symbol, page = pages, page_len, total = accumulated.len(), cursor = ?cursor, "收到一页K线");

        if settings.is_short_page(page_len) {
            debug!(target: "pagination", %exchange, symbol, page_len, "短页，下载结束");
            break;
        }

        if protocol.range_exhausted(&cursor, &page, window) {
            debug!(target: "pagination", %exchange, symbol, "已到达下载范围边界");
            break;
        }

        if pages >= settings.max_pages {
            return Err(AppError::PaginationError(format!(
                "{} {}: 超过页数上限 {}",
                exchange, symbol, settings.max_pages
            )));
        }

        cursor = protocol.advance(&cursor, &page, window)?;
    }

    Ok(accumulated)
}

/// 四个交易所的分页策略
#[derive(Debug, Clone)]
pub enum ExchangeStrategy {
    Okx(OkxProtocol),
    Bybit(BybitProtocol),
    Dydx(DydxProtocol),
    ApexPro(ApexProProtocol),
}

impl ExchangeStrategy {
    pub fn from_config(exchange: ExchangeId, config: &ExchangeConfig) -> Self {
        match exchange {
            ExchangeId::Okx => ExchangeStrategy::Okx(OkxProtocol::new(&config.ohlc_endpoint, &config.interval)),
            ExchangeId::Bybit => ExchangeStrategy::Bybit(BybitProtocol::new(
                &config.ohlc_endpoint,
                &config.interval,
                config.category.clone(),
            )),
            ExchangeId::Dydx => ExchangeStrategy::Dydx(DydxProtocol::new(&config.ohlc_endpoint, &config.interval)),
            ExchangeId::ApexPro => ExchangeStrategy::ApexPro(ApexProProtocol::new(
                &config.ohlc_endpoint,
                &config.interval,
            )),
        }
    }

    pub fn exchange(&self) -> ExchangeId {
        match self {
            ExchangeStrategy::Okx(p) => p.exchange(),
            ExchangeStrategy::Bybit(p) => p.exchange(),
            ExchangeStrategy::Dydx(p) => p.exchange(),
            ExchangeStrategy::ApexPro(p) => p.exchange(),
        }
    }

    pub async fn paginate<F: JsonFetcher>(
        &self,
        fetcher: &F,
        settings: &PaginationSettings,
        symbol: &str,
        window: &DownloadWindow,
    ) -> Result<Vec<Candle>> {
        match self {
            ExchangeStrategy::Okx(p) => run_pagination(p, fetcher, settings, symbol, window).await,
            ExchangeStrategy::Bybit(p) => run_pagination(p, fetcher, settings, symbol, window).await,
            ExchangeStrategy::Dydx(p) => run_pagination(p, fetcher, settings, symbol, window).await,
            ExchangeStrategy::ApexPro(p) => run_pagination(p, fetcher, settings, symbol, window).await,
        }
    }
}

/// 交易所策略 + 分页参数
#[derive(Debug, Clone)]
pub struct Paginator {
    strategy: ExchangeStrategy,
    settings: PaginationSettings,
}

impl Paginator {
    pub fn new(strategy: ExchangeStrategy, settings: PaginationSettings) -> Self {
        Self { strategy, settings }
    }

    pub fn from_config(exchange: ExchangeId, config: &ExchangeConfig) -> Self {
        Self::new(
            ExchangeStrategy::from_config(exchange, config),
            PaginationSettings::from_config(exchange, config),
        )
    }

    pub fn exchange(&self) -> ExchangeId {
        self.strategy.exchange()
    }

    pub fn settings(&self) -> &PaginationSettings {
        &self.settings
    }

    /// 下载一个品种在 `window` 内的全部K线
    #[instrument(target = "pagination", skip_all, fields(exchange = %self.exchange(), symbol = symbol))]
    pub async fn paginate<F: JsonFetcher>(
        &self,
        fetcher: &F,
        symbol: &str,
        window: &DownloadWindow,
    ) -> Result<Vec<Candle>> {
        let candles = self.strategy.paginate(fetcher, &self.settings, symbol, window).await?;
        info!(target: "pagination", records = candles.len(), start_ts = window.start_ts, end_ts = window.end_ts, "分页下载完成");
        Ok(candles)
    }
}
