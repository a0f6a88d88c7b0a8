// 导出共享模块
pub mod api;
pub mod config;
pub mod error;
pub mod logging_setup;
pub mod models;
pub mod retry;

// 重新导出常用类型，方便使用
pub use api::{JsonFetcher, PageRequest, RestClient};
pub use config::{ExchangeConfig, HarvesterConfig};
pub use error::{AppError, Result};
pub use models::{Candle, DownloadWindow, ExchangeId, Symbol, SymbolOutcome};
pub use retry::RetryPolicy;
