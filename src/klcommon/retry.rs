use crate::klcommon::config::HttpConfig;
use std::{future::Future, time::Duration};
use tokio::time::sleep;

/// 指数退避重试配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次重试前的等待
    pub initial_backoff: Duration,
    /// 等待上限
    pub max_backoff: Duration,
    /// 每次失败后等待时间的倍数
    pub multiplier: u32,
    /// 最大重试次数（不含首次请求）
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            multiplier: 2,
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    /// 不重试，只请求一次
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: 2,
            max_retries: config.max_retries,
        }
    }
}

/// 按指数退避执行异步操作
///
/// `should_retry` 决定某个错误是否值得重试；返回第一次成功的结果，
/// 或者在重试耗尽后返回最后一次的错误
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    should_retry: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.initial_backoff;

    for attempt in 0..policy.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) => {
                tracing::debug!(target: "api", attempt = attempt + 1, backoff_ms = backoff.as_millis() as u64, "请求失败，等待后重试");
                sleep(backoff).await;
                backoff = (backoff * policy.multiplier).min(policy.max_backoff);
            }
            Err(err) => return Err(err),
        }
    }

    operation().await
}
