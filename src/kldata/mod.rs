// 导出数据下载相关模块
pub mod catalog;
pub mod continuity;
pub mod normalizer;
pub mod orchestrator;
pub mod pagination;
pub mod resume;
pub mod staging;
pub mod store;

// 重新导出常用类型，方便使用
pub use catalog::SymbolCatalog;
pub use orchestrator::{ExchangeReport, ExchangeSummary, Orchestrator, SessionReport};
pub use pagination::{ExchangeStrategy, PageProtocol, PaginationSettings, Paginator};
pub use resume::ResumePointResolver;
pub use staging::{SeriesKey, StagingArea};
pub use store::{CsvStore, MergeReport};
