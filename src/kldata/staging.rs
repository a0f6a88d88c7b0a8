//! 待持久化K线的暂存区
//!
//! 分页下载完成后先暂存，再由持久化步骤取走写盘

use crate::klcommon::{Candle, ExchangeId, Symbol};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// 暂存区的键：(交易所, 品种, 基础币, 计价币)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub exchange: ExchangeId,
    pub symbol: String,
    pub base: String,
    pub quote: String,
}

impl SeriesKey {
    pub fn from_symbol(symbol: &Symbol) -> Self {
        Self {
            exchange: symbol.exchange,
            symbol: symbol.symbol.clone(),
            base: symbol.base.clone(),
            quote: symbol.quote.clone(),
        }
    }
}

/// 由编排器持有，按句柄传递给下载和持久化步骤
#[derive(Debug, Default)]
pub struct StagingArea {
    inner: Mutex<HashMap<SeriesKey, Vec<Candle>>>,
}

impl StagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// 暂存一批K线，同一个键上尚未取走的数据会被替换
    pub async fn stage(&self, key: SeriesKey, candles: Vec<Candle>) {
        let mut guard = self.inner.lock().await;
        guard.insert(key, candles);
    }

    /// 取走某个键的数据
    pub async fn take(&self, key: &SeriesKey) -> Option<Vec<Candle>> {
        self.inner.lock().await.remove(key)
    }

    pub async fn contains(&self, key: &SeriesKey) -> bool {
        self.inner.lock().await.contains_key(key)
    }

    /// 当前暂存的键数量
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
