use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::orders::{DateRange, OrderScraper, ScrapeSummary};
use crate::traits::Scraper;

/// スクレイピングリクエスト
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub range: DateRange,
    /// 配達先住所の部分一致フィルタ（空なら全件）
    pub address_filter: String,
}

impl ScrapeRequest {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            address_filter: String::new(),
        }
    }

    pub fn with_address_filter(mut self, filter: impl Into<String>) -> Self {
        self.address_filter = filter.into();
        self
    }
}

/// tower::Serviceを実装したスクレイパーサービス
///
/// 1リクエストごとにブラウザを起動し、終了時に閉じる。
#[derive(Debug, Clone, Default)]
pub struct OrderLoggerService {
    config: ScraperConfig,
}

impl OrderLoggerService {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }
}

impl Service<ScrapeRequest> for OrderLoggerService {
    type Response = ScrapeSummary;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ScrapeRequest) -> Self::Future {
        info!(
            "Scrape request: {} - {}, address filter {:?}",
            req.range.start, req.range.end, req.address_filter
        );
        let config = self.config.clone();

        Box::pin(async move {
            let mut scraper = OrderScraper::new(config);
            let summary = scraper.execute(&req).await?;

            info!(
                "Scrape complete: captured={}, missing={}, failed={}",
                summary.captured.len(),
                summary.missing.len(),
                summary.failed.len()
            );

            Ok(summary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::parse_order_time;
    use std::path::PathBuf;

    fn range() -> DateRange {
        DateRange::new(
            parse_order_time("2024-01-04").unwrap(),
            parse_order_time("2024-01-31").unwrap(),
        )
    }

    #[test]
    fn test_scrape_request_builder() {
        let req = ScrapeRequest::new(range()).with_address_filter("Defence Colony");

        assert_eq!(req.range, range());
        assert_eq!(req.address_filter, "Defence Colony");
    }

    #[test]
    fn test_scrape_request_defaults_to_no_filter() {
        let req = ScrapeRequest::new(range());
        assert!(req.address_filter.is_empty());
    }

    #[test]
    fn test_service_keeps_config() {
        let service =
            OrderLoggerService::new(ScraperConfig::new().with_csv_path("/tmp/orders.csv"));
        assert_eq!(service.config().csv_path, PathBuf::from("/tmp/orders.csv"));
    }
}
