//! 下载会话编排
//!
//! 一个会话：刷新品种目录 → 每个交易所一个并发任务 → 任务内逐个品种下载并落盘。
//! 单个品种失败只影响该品种，单个交易所任务失败（包括 panic）不影响其他交易所

use crate::kldata::catalog::{self, SymbolCatalog};
use crate::kldata::pagination::Paginator;
use crate::kldata::resume::{is_up_to_date, ResumePointResolver};
use crate::kldata::staging::{SeriesKey, StagingArea};
use crate::kldata::store::{CsvStore, MergeReport};
use crate::klcommon::{
    AppError, DownloadWindow, ExchangeId, HarvesterConfig, JsonFetcher, Result, Symbol, SymbolOutcome,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// 在阻塞线程池上执行文件操作
async fn blocking<T, F>(operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| AppError::TaskError(format!("文件任务异常退出: {}", e)))?
}

/// 一个交易所任务的结果
#[derive(Debug)]
pub struct ExchangeSummary {
    pub exchange: ExchangeId,
    pub outcomes: Vec<(Symbol, SymbolOutcome)>,
}

impl ExchangeSummary {
    /// 实际落盘的K线总数
    pub fn records(&self) -> usize {
        self.outcomes.iter().map(|(_, o)| o.records()).sum()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
    }

    /// 按结果类别计数
    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.label() == label).count()
    }
}

#[derive(Debug)]
pub struct ExchangeReport {
    pub exchange: ExchangeId,
    pub result: Result<ExchangeSummary>,
}

/// 一次会话的汇总
#[derive(Debug)]
pub struct SessionReport {
    pub catalog_symbols: usize,
    pub since_ts: i64,
    pub till_ts: i64,
    pub exchanges: Vec<ExchangeReport>,
}

impl SessionReport {
    pub fn total_records(&self) -> usize {
        self.exchanges
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .map(ExchangeSummary::records)
            .sum()
    }

    pub fn failed_exchanges(&self) -> Vec<ExchangeId> {
        self.exchanges
            .iter()
            .filter(|r| r.result.is_err())
            .map(|r| r.exchange)
            .collect()
    }

    pub fn failed_symbols(&self) -> usize {
        self.exchanges
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .map(ExchangeSummary::failures)
            .sum()
    }

    /// 输出会话汇总日志
    pub fn log_summary(&self) {
        for report in &self.exchanges {
            match &report.result {
                Ok(summary) => info!(
                    target: "orchestrator",
                    exchange = %report.exchange,
                    symbols = summary.outcomes.len(),
                    downloaded = summary.count("downloaded"),
                    updated = summary.count("updated"),
                    up_to_date = summary.count("up_to_date"),
                    no_new_data = summary.count("no_new_data"),
                    failed = summary.failures(),
                    records = summary.records(),
                    "交易所下载完成"
                ),
                Err(e) => error!(
                    target: "orchestrator",
                    exchange = %report.exchange,
                    error_type = e.get_error_type_summary(),
                    "交易所任务失败: {}", e
                ),
            }
        }

        info!(
            target: "orchestrator",
            catalog_symbols = self.catalog_symbols,
            total_records = self.total_records(),
            failed_symbols = self.failed_symbols(),
            failed_exchanges = self.failed_exchanges().len(),
            "所有交易所下载完成"
        );
    }
}

/// 会话编排器，持有本次会话的全部共享状态
pub struct Orchestrator<F> {
    config: Arc<HarvesterConfig>,
    fetcher: Arc<F>,
    store: Arc<CsvStore>,
    catalog: Arc<SymbolCatalog>,
    staging: Arc<StagingArea>,
}

impl<F> Clone for Orchestrator<F> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
            staging: Arc::clone(&self.staging),
        }
    }
}

impl<F: JsonFetcher + 'static> Orchestrator<F> {
    pub fn new(config: HarvesterConfig, fetcher: F) -> Self {
        let store = CsvStore::new(&config.session.data_dir, &config.session.catalog_path);
        Self {
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            store: Arc::new(store),
            catalog: Arc::new(SymbolCatalog::new()),
            staging: Arc::new(StagingArea::new()),
        }
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn store(&self) -> &CsvStore {
        &self.store
    }

    pub fn catalog(&self) -> &SymbolCatalog {
        &self.catalog
    }

    /// 运行一次完整会话
    pub async fn run_session(&self, now_ms: i64) -> Result<SessionReport> {
        let since_ts = self.config.since_ts(now_ms);
        let till_ts = now_ms;

        let catalog_symbols = self.refresh_catalog().await?;
        info!(target: "orchestrator", since_ts, till_ts, catalog_symbols, "开始下载K线");

        let exchanges = self.run_downloads(since_ts, till_ts).await;
        Ok(SessionReport {
            catalog_symbols,
            since_ts,
            till_ts,
            exchanges,
        })
    }

    /// 依次拉取各交易所的品种列表并写出目录文件
    ///
    /// 某个交易所拉取失败时记录错误，该交易所本次没有品种
    pub async fn refresh_catalog(&self) -> Result<usize> {
        for exchange in &self.config.session.exchanges {
            let symbols = match self.config.exchange(*exchange) {
                Ok(config) => match catalog::fetch_symbols(self.fetcher.as_ref(), *exchange, config).await {
                    Ok(symbols) => symbols,
                    Err(e) => {
                        error!(target: "catalog", %exchange, error_type = e.get_error_type_summary(), "获取品种列表失败: {}", e);
                        Vec::new()
                    }
                },
                Err(e) => {
                    error!(target: "catalog", %exchange, "{}", e);
                    Vec::new()
                }
            };

            self.catalog.replace_exchange(*exchange, symbols).await;
        }

        let all = self.catalog.all().await;
        let store = Arc::clone(&self.store);
        blocking(move || store.write_catalog(&all)).await
    }

    /// 每个交易所一个任务并发执行，收集全部结果
    pub async fn run_downloads(&self, since_ts: i64, till_ts: i64) -> Vec<ExchangeReport> {
        let mut exchanges = Vec::new();
        let mut handles = Vec::new();

        for exchange in self.config.session.exchanges.iter().copied() {
            let this = self.clone();
            exchanges.push(exchange);
            handles.push(tokio::spawn(async move {
                this.run_exchange(exchange, since_ts, till_ts).await
            }));
        }

        let results = futures::future::join_all(handles).await;

        exchanges
            .into_iter()
            .zip(results)
            .map(|(exchange, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    Err(AppError::TaskError(format!("{} 任务异常退出: {}", exchange, e)))
                });
                if let Err(e) = &result {
                    error!(target: "orchestrator", %exchange, "交易所任务失败: {}", e);
                }
                ExchangeReport { exchange, result }
            })
            .collect()
    }

    /// 逐个品种下载一个交易所
    #[instrument(target = "orchestrator", skip(self))]
    async fn run_exchange(&self, exchange: ExchangeId, since_ts: i64, till_ts: i64) -> Result<ExchangeSummary> {
        let config = self.config.exchange(exchange)?;
        let paginator = Paginator::from_config(exchange, config);
        let symbols = self.catalog.get_symbols(exchange).await;
        let started = Instant::now();

        info!(target: "orchestrator", symbols = symbols.len(), "开始下载交易所K线");

        let mut outcomes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let outcome = match self
                .download_symbol(&paginator, &symbol, since_ts, till_ts, config.bar_interval_ms)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        target: "orchestrator",
                        symbol = %symbol,
                        error_type = e.get_error_type_summary(),
                        "品种下载失败，下次运行时重试: {}", e
                    );
                    SymbolOutcome::Failed { reason: e.to_string() }
                }
            };

            let fetched = !matches!(outcome, SymbolOutcome::UpToDate);
            outcomes.push((symbol, outcome));

            if fetched && !config.symbol_delay().is_zero() {
                tokio::time::sleep(config.symbol_delay()).await;
            }
        }

        info!(target: "orchestrator", elapsed_ms = started.elapsed().as_millis() as u64, "交易所下载结束");
        Ok(ExchangeSummary { exchange, outcomes })
    }

    /// 下载并持久化一个品种
    async fn download_symbol(
        &self,
        paginator: &Paginator,
        symbol: &Symbol,
        since_ts: i64,
        till_ts: i64,
        bar_interval_ms: i64,
    ) -> Result<SymbolOutcome> {
        let exchange = symbol.exchange;

        let (start_ts, existed) = {
            let store = Arc::clone(&self.store);
            let (base, quote) = (symbol.base.clone(), symbol.quote.clone());
            blocking(move || {
                let start = ResumePointResolver::new(&store).resolve(exchange, &base, &quote, since_ts, bar_interval_ms)?;
                Ok((start, store.exists(exchange, &base, &quote)))
            })
            .await?
        };

        if is_up_to_date(start_ts, till_ts) {
            info!(target: "orchestrator", symbol = %symbol, "已是最新，跳过");
            return Ok(SymbolOutcome::UpToDate);
        }

        let window = DownloadWindow {
            start_ts,
            end_ts: till_ts,
            bar_interval_ms,
        };
        let candles = paginator.paginate(self.fetcher.as_ref(), &symbol.symbol, &window).await?;

        if candles.is_empty() {
            info!(target: "orchestrator", symbol = %symbol, "没有新数据");
            return Ok(SymbolOutcome::NoNewData);
        }

        let key = SeriesKey::from_symbol(symbol);
        self.staging.stage(key.clone(), candles).await;
        let report = self.persist_staged(&key, bar_interval_ms).await?;

        let outcome = if existed {
            SymbolOutcome::Updated { records: report.added_rows() }
        } else {
            SymbolOutcome::Downloaded { records: report.added_rows() }
        };

        if report.fallback {
            warn!(target: "orchestrator", symbol = %symbol, "已有数据合并失败，文件已被本次数据覆盖");
        }
        info!(
            target: "orchestrator",
            symbol = %symbol,
            outcome = outcome.label(),
            records = outcome.records(),
            total_rows = report.total_rows,
            "品种下载完成"
        );
        Ok(outcome)
    }

    /// 取走暂存的K线并合并写盘
    async fn persist_staged(&self, key: &SeriesKey, bar_interval_ms: i64) -> Result<MergeReport> {
        let candles = self.staging.take(key).await.ok_or_else(|| {
            AppError::StorageError(format!("{} {} 没有暂存数据", key.exchange, key.symbol))
        })?;

        let store = Arc::clone(&self.store);
        let key = key.clone();
        blocking(move || {
            store.merge_and_persist(key.exchange, &key.symbol, &key.base, &key.quote, &candles, bar_interval_ms)
        })
        .await
    }
}
