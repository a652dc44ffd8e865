//! 注文履歴ロガー CLI
//!
//! 実行方法:
//! ```
//! cargo run -- --address-filter "Defence Colony"
//! cargo run -- --start-date 2024-01-01 --debug-logs
//! ```

use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use order_logger::{
    CalibrationMode, DateRange, OrderLoggerService, Region, ScrapeRequest, ScraperConfig,
    ScraperError,
};
use tower::Service;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOOKBACK_DAYS: i64 = 7;

#[derive(Parser, Debug)]
#[command(name = "order-logger", about = "注文履歴のレシートとCSVを書き出す")]
struct Args {
    /// 取得開始日 (YYYY-MM-DD)。省略時は対話入力
    #[arg(long)]
    start_date: Option<String>,

    /// 配達先住所の部分一致フィルタ
    #[arg(long, env = "ORDER_ADDRESS_FILTER", default_value = "")]
    address_filter: String,

    #[arg(long)]
    headless: bool,

    /// debugログとページのconsole出力を表示
    #[arg(long)]
    debug_logs: bool,

    /// 固定の切り抜き領域 (x,y,width,height)
    #[arg(long, value_parser = parse_clip)]
    clip: Option<Region>,

    #[arg(long, default_value = "screenshots")]
    screenshot_dir: PathBuf,

    #[arg(long, default_value = "orders.csv")]
    csv: PathBuf,
}

fn parse_clip(raw: &str) -> Result<Region, String> {
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in clip: {}", e))?;
    match parts.as_slice() {
        [x, y, width, height] => Ok(Region {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        }),
        _ => Err("clip must be x,y,width,height".to_string()),
    }
}

/// 空なら None（既定の期間を使う）
fn parse_start_date(input: &str) -> Result<Option<NaiveDate>, ScraperError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| ScraperError::InvalidDate(input.to_string()))
}

fn prompt_start_date() -> std::io::Result<String> {
    print!(
        "Enter Start Date (YYYY-MM-DD) [Enter to default: {} days ago]: ",
        DEFAULT_LOOKBACK_DAYS
    );
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // ログ設定
    let default_filter = if args.debug_logs { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("--- Order Logger ---");
    if args.debug_logs {
        info!("Debug logs: ENABLED");
    }

    let raw_start = match &args.start_date {
        Some(raw) => raw.clone(),
        None => prompt_start_date()?,
    };
    let range = match parse_start_date(&raw_start) {
        Ok(Some(start)) => DateRange::since(start),
        Ok(None) => DateRange::last_days(DEFAULT_LOOKBACK_DAYS),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Date range: {} - {}", range.start.date(), range.end.date());
    if args.address_filter.is_empty() {
        warn!("No address filter given; every delivery address will be captured");
    }

    let mut config = ScraperConfig::new()
        .with_headless(args.headless)
        .with_debug(args.debug_logs)
        .with_screenshot_dir(args.screenshot_dir)
        .with_csv_path(args.csv);
    if let Some(region) = args.clip {
        config = config.with_calibration(CalibrationMode::Fixed(region));
    }

    let request = ScrapeRequest::new(range).with_address_filter(args.address_filter);
    let mut service = OrderLoggerService::new(config);

    match service.call(request).await {
        Ok(summary) => {
            if let Some(reason) = &summary.aborted {
                warn!("Run ended early: {}", reason);
            }
            info!(
                "Done: {} receipts captured, {} orders not found on page, {} failed",
                summary.captured.len(),
                summary.missing.len(),
                summary.failed.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            std::process::exit(1);
        }
    }
}
