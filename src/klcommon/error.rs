use crate::klcommon::models::ExchangeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// 交易所返回非 2xx 状态码
    #[error("HTTP status {status}: {detail}")]
    StatusError { status: u16, detail: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("URL parsing error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// 交易所返回的数据包缺少预期字段，或者单条K线无法解析
    #[error("Malformed response from {exchange}: {detail}")]
    MalformedResponse { exchange: ExchangeId, detail: String },

    /// 单条记录解析失败（字段缺失、数字或时间格式错误）
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 游标不前进、页数超限等分页异常
    #[error("Pagination error: {0}")]
    PaginationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl AppError {
    /// 获取错误类型的简洁摘要，用于日志中的错误分类
    ///
    /// 返回一个稳定的错误类别字符串，便于按类别聚合统计
    pub fn get_error_type_summary(&self) -> &'static str {
        match self {
            // K线数据获取相关
            AppError::ApiError(_) => "kline_data_acquisition_failed",
            AppError::HttpError(_) => "market_data_connection_failed",
            AppError::StatusError { .. } => "exchange_request_rejected",

            // K线数据处理相关
            AppError::JsonError(_) => "kline_data_parsing_failed",
            AppError::MalformedResponse { .. } => "exchange_response_malformed",
            AppError::ParseError(_) => "market_data_format_invalid",
            AppError::PaginationError(_) => "kline_pagination_anomaly",

            // K线数据存储相关
            AppError::CsvError(_) => "kline_export_failed",
            AppError::StorageError(_) => "kline_data_persistence_failed",
            AppError::IoError(_) => "kline_file_operation_failed",

            // 配置相关
            AppError::ConfigError(_) => "kline_service_configuration_invalid",
            AppError::UrlParseError(_) => "market_endpoint_invalid",

            AppError::TaskError(_) => "exchange_task_failed",
        }
    }

    /// 检查错误是否为可重试类型
    ///
    /// 只有传输层错误会重试；数据格式错误直接终止当前品种的下载
    pub fn is_retryable(&self) -> bool {
        match self {
            // 网络相关错误通常可重试
            AppError::HttpError(_) | AppError::ApiError(_) => true,

            // 服务端错误和限频可重试，其余 4xx 重试也不会成功
            AppError::StatusError { status, .. } => *status >= 500 || *status == 429,

            AppError::JsonError(_)
            | AppError::MalformedResponse { .. }
            | AppError::ParseError(_)
            | AppError::PaginationError(_)
            | AppError::CsvError(_)
            | AppError::StorageError(_)
            | AppError::IoError(_)
            | AppError::ConfigError(_)
            | AppError::UrlParseError(_)
            | AppError::TaskError(_) => false,
        }
    }

    /// 将记录级解析错误提升为整页的格式错误，其他错误原样返回
    pub fn into_malformed(self, exchange: ExchangeId) -> Self {
        match self {
            AppError::ParseError(detail) => AppError::MalformedResponse { exchange, detail },
            AppError::JsonError(e) => AppError::MalformedResponse {
                exchange,
                detail: e.to_string(),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
