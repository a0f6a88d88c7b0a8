//! 下载系统配置模块
//!
//! 所有配置从 TOML 文件加载，`[exchanges.<name>]` 小节描述每个交易所的端点和分页参数

use crate::klcommon::{AppError, ExchangeId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 系统配置常量
pub mod constants {
    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = "config/harvester.toml";

    /// 默认回溯天数
    pub const DEFAULT_SINCE_NUM_DAYS_BEFORE: u32 = 90;

    /// 默认的短页判定比例：本页记录数低于最大页大小的一半即视为已到末尾
    pub const DEFAULT_SHORT_PAGE_RATIO: f64 = 0.5;

    /// 默认翻页间隔（毫秒）
    pub const DEFAULT_PAGE_DELAY_MS: u64 = 100;

    /// 默认品种间隔（毫秒）
    pub const DEFAULT_SYMBOL_DELAY_MS: u64 = 500;

    /// 单个品种最多请求的页数
    pub const DEFAULT_MAX_PAGES: usize = 50_000;

    /// 一天的毫秒数
    pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
}

use constants::*;

fn default_bar_interval_ms() -> i64 {
    crate::klcommon::models::ONE_MINUTE_MS
}

fn default_short_page_ratio() -> f64 {
    DEFAULT_SHORT_PAGE_RATIO
}

fn default_page_delay_ms() -> u64 {
    DEFAULT_PAGE_DELAY_MS
}

fn default_symbol_delay_ms() -> u64 {
    DEFAULT_SYMBOL_DELAY_MS
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_since_num_days_before() -> u32 {
    DEFAULT_SINCE_NUM_DAYS_BEFORE
}

/// 下载系统总配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// 会话配置
    pub session: SessionConfig,

    /// HTTP客户端配置
    #[serde(default)]
    pub http: HttpConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 各交易所配置，键为交易所小写名称
    pub exchanges: BTreeMap<String, ExchangeConfig>,
}

/// 会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 本次会话要下载的交易所
    pub exchanges: Vec<ExchangeId>,

    /// K线文件目录
    pub data_dir: PathBuf,

    /// 品种目录文件路径
    pub catalog_path: PathBuf,

    /// 没有历史数据时向前回溯的天数
    #[serde(default = "default_since_num_days_before")]
    pub since_num_days_before: u32,
}

/// HTTP客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// 请求超时（秒）
    pub timeout_secs: u64,

    /// 连接超时（秒）
    pub connect_timeout_secs: u64,

    /// 代理地址，例如 "socks5://127.0.0.1:1080"，为空则直连
    pub proxy: Option<String>,

    /// 传输层错误的最大重试次数
    pub max_retries: u32,

    /// 首次重试前的等待（毫秒）
    pub initial_backoff_ms: u64,

    /// 重试等待上限（毫秒）
    pub max_backoff_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)，RUST_LOG 优先
    pub log_level: String,

    /// 日志目录
    pub log_dir: PathBuf,

    /// 日志文件名前缀，按天滚动
    pub file_prefix: String,

    /// 文件日志是否使用JSON格式
    pub json_file: bool,

    /// 是否同时输出到控制台
    pub console: bool,
}

/// 单个交易所的端点和分页参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// 品种列表端点
    pub ticker_endpoint: String,

    /// K线端点（dYdX 会在末尾拼接品种名）
    pub ohlc_endpoint: String,

    /// 交易所原生的周期参数，例如 OKX "1m"、Bybit "1"、dYdX "1MIN"
    pub interval: String,

    /// 周期对应的毫秒数，用于续传点计算和连续性检查
    #[serde(default = "default_bar_interval_ms")]
    pub bar_interval_ms: i64,

    /// 单次请求的最大返回条数
    pub max_page_size: usize,

    /// 短页判定比例
    #[serde(default = "default_short_page_ratio")]
    pub short_page_ratio: f64,

    /// 翻页之间的等待（毫秒）
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// 品种之间的等待（毫秒）
    #[serde(default = "default_symbol_delay_ms")]
    pub symbol_delay_ms: u64,

    /// 零条记录的页面是否视为格式错误，未配置时按交易所取默认值
    #[serde(default)]
    pub empty_page_is_error: Option<bool>,

    /// 单个品种最多请求的页数
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Bybit 的 category 参数，例如 "linear"
    #[serde(default)]
    pub category: Option<String>,

    /// 只下载这些品种（交易所原生名称），为空则下载全部
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            proxy: None,
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            file_prefix: "ohlcv_harvester.log".to_string(),
            json_file: false,
            console: true,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ExchangeConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn symbol_delay(&self) -> Duration {
        Duration::from_millis(self.symbol_delay_ms)
    }

    /// 低于该条数的页面视为短页
    pub fn short_page_threshold(&self) -> f64 {
        self.short_page_ratio * self.max_page_size as f64
    }

    /// 零条记录的页面是否视为格式错误
    ///
    /// OKX、Bybit、dYdX 在合法的数据包里返回空数组表示没有更多数据；
    /// ApeX Pro 的空 `data` 是异常响应
    pub fn empty_page_is_error(&self, exchange: ExchangeId) -> bool {
        self.empty_page_is_error
            .unwrap_or(exchange == ExchangeId::ApexPro)
    }

    /// 品种是否在白名单内（未配置白名单时全部放行）
    pub fn allows_symbol(&self, symbol: &str) -> bool {
        self.symbols
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|s| s == symbol))
    }
}

impl HarvesterConfig {
    /// 从文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    /// 从 TOML 字符串解析并验证配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::ConfigError(format!("解析配置文件失败: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// 获取指定交易所的配置
    pub fn exchange(&self, exchange: ExchangeId) -> Result<&ExchangeConfig> {
        self.exchanges.get(exchange.as_str()).ok_or_else(|| {
            AppError::ConfigError(format!("缺少交易所配置: [exchanges.{}]", exchange))
        })
    }

    /// 没有历史数据时的起始时间（毫秒）
    pub fn since_ts(&self, now_ms: i64) -> i64 {
        now_ms - i64::from(self.session.since_num_days_before) * DAY_MS
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.session.exchanges.is_empty() {
            return Err(AppError::ConfigError("交易所列表不能为空".to_string()));
        }

        for name in self.exchanges.keys() {
            name.parse::<ExchangeId>()?;
        }

        for exchange in &self.session.exchanges {
            let config = self.exchange(*exchange)?;

            url::Url::parse(&config.ticker_endpoint)?;
            url::Url::parse(&config.ohlc_endpoint)?;

            if config.max_page_size == 0 {
                return Err(AppError::ConfigError(format!(
                    "{}: max_page_size 必须大于0",
                    exchange
                )));
            }

            if !(config.short_page_ratio > 0.0 && config.short_page_ratio <= 1.0) {
                return Err(AppError::ConfigError(format!(
                    "{}: short_page_ratio 必须在 (0, 1] 区间内，当前为 {}",
                    exchange, config.short_page_ratio
                )));
            }

            if config.bar_interval_ms <= 0 {
                return Err(AppError::ConfigError(format!(
                    "{}: bar_interval_ms 必须大于0",
                    exchange
                )));
            }

            // ApeX Pro 的时间窗口按秒计算
            if *exchange == ExchangeId::ApexPro && config.bar_interval_ms % 1000 != 0 {
                return Err(AppError::ConfigError(format!(
                    "{}: bar_interval_ms 必须是整秒",
                    exchange
                )));
            }

            if config.max_pages == 0 {
                return Err(AppError::ConfigError(format!(
                    "{}: max_pages 必须大于0",
                    exchange
                )));
            }
        }

        if let Some(proxy) = &self.http.proxy {
            url::Url::parse(proxy)?;
        }

        Ok(())
    }
}
