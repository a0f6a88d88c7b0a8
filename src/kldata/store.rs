//! K线 CSV 存储
//!
//! 每个 (交易所, 基础币, 计价币) 一个文件：`<data_dir>/<exchange>-<base>-<quote>.csv`，
//! 表头 `timestamp,open,high,low,close`，时间戳升序且不重复

use crate::kldata::continuity::{self, SpacingViolation};
use crate::klcommon::{AppError, Candle, ExchangeId, Result, Symbol};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 一次合并写入的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub path: PathBuf,
    /// 写入前文件中的行数
    pub existing_rows: usize,
    /// 本次传入的K线条数
    pub new_rows: usize,
    /// 写入后的总行数
    pub total_rows: usize,
    /// 被去重掉的行数
    pub duplicates: usize,
    /// 文件是否由本次写入新建
    pub created: bool,
    /// 合并失败后改为直接覆盖写入
    pub fallback: bool,
    /// 写入后检测到的间距异常
    pub violations: Vec<SpacingViolation>,
}

impl MergeReport {
    /// 文件中新增的行数，不含与已有数据重复的K线
    pub fn added_rows(&self) -> usize {
        self.total_rows.saturating_sub(self.existing_rows)
    }
}

/// 合并两段K线：按时间戳去重（后写入的覆盖先写入的）并升序排列
///
/// 返回合并结果和被去重的条数
pub fn merge_candles(existing: &[Candle], new: &[Candle]) -> (Vec<Candle>, usize) {
    let mut by_timestamp: BTreeMap<i64, Candle> = BTreeMap::new();

    for candle in existing.iter().chain(new.iter()) {
        by_timestamp.insert(candle.timestamp, *candle);
    }

    let merged: Vec<Candle> = by_timestamp.into_values().collect();
    let duplicates = existing.len() + new.len() - merged.len();
    (merged, duplicates)
}

/// 原子写入：先写临时文件并落盘，再重命名覆盖目标
fn write_atomic<T, F>(path: &Path, rows: &[T], write_row: F) -> Result<()>
where
    F: Fn(&mut csv::Writer<File>, &T) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("csv.tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = csv::Writer::from_writer(file);

    for row in rows {
        write_row(&mut writer, row)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| AppError::StorageError(format!("刷新CSV缓冲失败 {}: {}", tmp_path.display(), e)))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// CSV 文件存储
#[derive(Debug, Clone)]
pub struct CsvStore {
    data_dir: PathBuf,
    catalog_path: PathBuf,
}

impl CsvStore {
    pub fn new(data_dir: impl Into<PathBuf>, catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            catalog_path: catalog_path.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// 某个交易对的数据文件路径
    pub fn series_path(&self, exchange: ExchangeId, base: &str, quote: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}-{}-{}.csv", exchange.as_str(), base, quote))
    }

    /// 数据文件是否存在
    pub fn exists(&self, exchange: ExchangeId, base: &str, quote: &str) -> bool {
        self.series_path(exchange, base, quote).is_file()
    }

    /// 读取完整序列，文件不存在时返回空
    pub fn read_series(&self, exchange: ExchangeId, base: &str, quote: &str) -> Result<Vec<Candle>> {
        let path = self.series_path(exchange, base, quote);
        if !path.is_file() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut candles = Vec::new();
        for row in reader.deserialize::<Candle>() {
            candles.push(row?);
        }

        Ok(candles)
    }

    /// 已持久化的最大时间戳，文件不存在或为空时返回 None
    pub fn get_last_timestamp(&self, exchange: ExchangeId, base: &str, quote: &str) -> Result<Option<i64>> {
        let path = self.series_path(exchange, base, quote);
        if !path.is_file() {
            return Ok(None);
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut last: Option<i64> = None;

        for record in reader.records() {
            let record = record?;
            let field = record.get(0).ok_or_else(|| {
                AppError::StorageError(format!("{} 存在空行", path.display()))
            })?;
            let ts = field.parse::<i64>().map_err(|e| {
                AppError::StorageError(format!(
                    "{} 中的时间戳无法解析 '{}': {}",
                    path.display(),
                    field,
                    e
                ))
            })?;
            last = Some(last.map_or(ts, |current| current.max(ts)));
        }

        Ok(last)
    }

    fn write_series(path: &Path, candles: &[Candle]) -> Result<()> {
        write_atomic(path, candles, |writer, candle| Ok(writer.serialize(candle)?))
    }

    /// 读取已有数据、合并、写回
    fn merge_path(&self, path: &Path, exchange: ExchangeId, base: &str, quote: &str, candles: &[Candle]) -> Result<(Vec<Candle>, usize, usize)> {
        let existing = self.read_series(exchange, base, quote)?;
        let (merged, duplicates) = merge_candles(&existing, candles);
        Self::write_series(path, &merged)?;
        Ok((merged, existing.len(), duplicates))
    }

    /// 将新K线合并进已有序列并原子写入
    ///
    /// 重复时间戳保留新值，结果升序。合并失败时退化为只用新数据覆盖文件，
    /// 两条路径都会记录日志。写入后做连续性检查，发现异常只告警
    pub fn merge_and_persist(
        &self,
        exchange: ExchangeId,
        symbol: &str,
        base: &str,
        quote: &str,
        candles: &[Candle],
        bar_interval_ms: i64,
    ) -> Result<MergeReport> {
        let path = self.series_path(exchange, base, quote);
        let created = !path.is_file();

        let (merged, existing_rows, duplicates, fallback) =
            match self.merge_path(&path, exchange, base, quote, candles) {
                Ok((merged, existing_rows, duplicates)) => {
                    debug!(target: "store", path = %path.display(), existing_rows, new_rows = candles.len(), duplicates, "合并写入完成");
                    (merged, existing_rows, duplicates, false)
                }
                Err(e) => {
                    warn!(target: "store", path = %path.display(), error = %e, "合并已有数据失败，改为覆盖写入");
                    let (merged, duplicates) = merge_candles(&[], candles);
                    Self::write_series(&path, &merged).map_err(|overwrite_err| {
                        AppError::StorageError(format!(
                            "{} 覆盖写入失败: {} (合并错误: {})",
                            path.display(),
                            overwrite_err,
                            e
                        ))
                    })?;
                    info!(target: "store", path = %path.display(), rows = merged.len(), "覆盖写入完成");
                    (merged, 0, duplicates, true)
                }
            };

        let violations = continuity::check_candles(&merged, bar_interval_ms);
        if !violations.is_empty() {
            warn!(
                target: "store",
                %exchange,
                symbol,
                count = violations.len(),
                first = %violations[0].describe(),
                "数据连续性检查发现异常"
            );
        }

        Ok(MergeReport {
            path,
            existing_rows,
            new_rows: candles.len(),
            total_rows: merged.len(),
            duplicates,
            created,
            fallback,
            violations,
        })
    }

    /// 写出品种目录文件，返回写入的行数
    pub fn write_catalog(&self, symbols: &[Symbol]) -> Result<usize> {
        write_atomic(&self.catalog_path, symbols, |writer, symbol| Ok(writer.serialize(symbol)?))?;
        info!(target: "store", path = %self.catalog_path.display(), count = symbols.len(), "品种目录已写入");
        Ok(symbols.len())
    }
}
