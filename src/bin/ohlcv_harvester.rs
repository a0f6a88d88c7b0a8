// OHLCV 历史K线增量下载器主程序
use anyhow::{Context, Result};
use clap::Parser;
use ohlcv_harvester::klcommon::config::constants::DEFAULT_CONFIG_PATH;
use ohlcv_harvester::klcommon::logging_setup::init_logging;
use ohlcv_harvester::klcommon::{ExchangeId, HarvesterConfig, RestClient};
use ohlcv_harvester::kldata::Orchestrator;
use std::path::PathBuf;
use tracing::{error, info};

/// 从 OKX / Bybit / dYdX / ApeX Pro 增量下载分钟K线并保存为CSV
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 只下载这些交易所，逗号分隔，覆盖配置文件
    #[arg(short, long, value_delimiter = ',')]
    exchanges: Option<Vec<ExchangeId>>,

    /// 没有历史数据时向前回溯的天数，覆盖配置文件
    #[arg(long)]
    since_days: Option<u32>,
}

/// 加载配置并应用命令行覆盖
fn load_config(cli: &Cli) -> Result<HarvesterConfig> {
    let mut config = HarvesterConfig::from_file(&cli.config)
        .with_context(|| format!("加载配置文件失败: {}", cli.config.display()))?;

    if let Some(exchanges) = &cli.exchanges {
        config.session.exchanges = exchanges.clone();
    }
    if let Some(days) = cli.since_days {
        config.session.since_num_days_before = days;
    }

    config.validate().context("命令行参数与配置不一致")?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // guard 必须持有到程序结束
    let _guard = init_logging(&config.logging).context("初始化日志失败")?;

    info!(
        config = %cli.config.display(),
        exchanges = ?config.session.exchanges,
        since_days = config.session.since_num_days_before,
        data_dir = %config.session.data_dir.display(),
        "启动OHLCV下载器"
    );

    let client = RestClient::new(&config.http).context("创建HTTP客户端失败")?;
    let orchestrator = Orchestrator::new(config, client);

    let now_ms = chrono::Utc::now().timestamp_millis();
    match orchestrator.run_session(now_ms).await {
        Ok(report) => {
            report.log_summary();
            info!("下载会话结束");
            Ok(())
        }
        Err(e) => {
            error!(error_type = e.get_error_type_summary(), "下载会话失败: {}", e);
            Err(e.into())
        }
    }
}
