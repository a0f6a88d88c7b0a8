use crate::klcommon::config::HttpConfig;
use crate::klcommon::retry::{retry_with_backoff, RetryPolicy};
use crate::klcommon::{AppError, Result};
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, error, instrument, warn};

/// 日志中保留的响应正文长度
const RESPONSE_PREVIEW_CHARS: usize = 1000;

/// 一次 GET 请求：端点 + 查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    /// 追加一个查询参数
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// 按名称查找查询参数
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 截取响应预览，用于错误日志
pub fn preview(text: &str) -> String {
    text.chars().take(RESPONSE_PREVIEW_CHARS).collect()
}

/// 获取 JSON 响应的抽象
///
/// 生产环境由 [`RestClient`] 实现；测试中用脚本化的实现替代上游交易所
pub trait JsonFetcher: Send + Sync {
    fn get_json(&self, request: &PageRequest) -> impl Future<Output = Result<Value>> + Send;
}

/// 交易所 REST 客户端
///
/// 所有交易所共用一个连接池；传输层错误按 [`RetryPolicy`] 重试
#[derive(Clone, Debug)]
pub struct RestClient {
    client: Client,
    retry: RetryPolicy,
}

impl RestClient {
    /// 根据配置创建客户端
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(concat!("ohlcv_harvester/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| AppError::ConfigError(format!("设置代理失败: {} - {}", proxy_url, e)))?;
            debug!(target: "api", proxy = %proxy_url, "使用代理创建HTTP客户端");
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))?;

        Ok(Self {
            client,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// 替换重试策略
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 发送一次请求，不重试
    async fn get_once(&self, request: &PageRequest) -> Result<Value> {
        let response = self
            .client
            .get(&request.url)
            .query(&request.query)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "api", url = %request.url, error = %e, "HTTP请求失败");
                AppError::from(e)
            })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!(target: "api", url = %request.url, %status, response = %preview(&text), "API响应状态错误");
            return Err(AppError::StatusError {
                status: status.as_u16(),
                detail: format!("{} 返回 {} - {}", request.url, status, preview(&text)),
            });
        }

        serde_json::from_str::<Value>(&text).map_err(|e| {
            error!(target: "api", url = %request.url, response = %preview(&text), "解析JSON失败: {}", e);
            AppError::JsonError(e)
        })
    }
}

impl JsonFetcher for RestClient {
    #[instrument(target = "api", skip_all, fields(url = %request.url))]
    async fn get_json(&self, request: &PageRequest) -> Result<Value> {
        debug!(target: "api", query = ?request.query, "发送请求");
        retry_with_backoff(&self.retry, AppError::is_retryable, || self.get_once(request)).await
    }
}
