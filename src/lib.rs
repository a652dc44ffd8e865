//! 注文履歴ロガー
//!
//! - ブラウザを操作して注文一覧APIのレスポンスを傍受
//! - 画面上の注文を開いてレシートを切り抜き撮影し、CSVに1行ずつ出力
//!
//! # 使用例
//!
//! ```rust,ignore
//! use order_logger::{DateRange, OrderLoggerService, ScrapeRequest, ScraperConfig};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = OrderLoggerService::new(ScraperConfig::new().with_headless(false));
//!
//!     let request = ScrapeRequest::new(DateRange::last_days(7))
//!         .with_address_filter("Defence Colony");
//!
//!     let summary = service.call(request).await.unwrap();
//!     println!("Captured: {}", summary.captured.len());
//! }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod orders;
pub mod output;
pub mod service;
pub mod session;
pub mod traits;

// 主要な型をリエクスポート
pub use config::{CalibrationMode, ScraperConfig, Timings};
pub use error::ScraperError;
pub use orders::{
    DateRange, ExpansionOutcome, Order, OrderScraper, OrderStore, OutputRecord, Region,
    ScrapeSummary,
};
pub use service::{OrderLoggerService, ScrapeRequest};
pub use traits::{PageDriver, RecordSink, RegionStrategy, Scraper};
