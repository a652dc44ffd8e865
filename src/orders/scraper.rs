//! 注文履歴スクレイパー実装
//!
//! API傍受 → 一覧展開 → 注文ごとのキャプチャ の順に実行する

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use tracing::{debug, error, info, warn};

use crate::browser::{forward_console, launch_browser, ChromePage};
use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::output::{prepare_outputs, CsvSink};
use crate::service::ScrapeRequest;
use crate::session::SessionStore;
use crate::traits::{PageDriver, RecordSink, Scraper};

use super::calibration::strategy_for;
use super::capture::{CaptureLoop, CaptureSettings};
use super::expansion::{expand_order_list, ExpansionOutcome};
use super::interceptor::spawn_interceptor;
use super::store::OrderStore;
use super::types::{DateRange, OutputRecord, Region};

/// 1回の実行結果
#[derive(Debug, Clone)]
pub struct ScrapeSummary {
    pub range: DateRange,
    pub expansion: Option<ExpansionOutcome>,
    /// APIから取得した注文数（期間外を含む）
    pub orders_seen: usize,
    pub captured: Vec<OutputRecord>,
    pub missing: Vec<String>,
    pub failed: Vec<String>,
    pub calibration: Option<Region>,
    /// 途中で中断した場合の理由
    pub aborted: Option<String>,
}

impl ScrapeSummary {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            expansion: None,
            orders_seen: 0,
            captured: Vec::new(),
            missing: Vec::new(),
            failed: Vec::new(),
            calibration: None,
            aborted: None,
        }
    }
}

/// 注文履歴スクレイパー
pub struct OrderScraper {
    config: ScraperConfig,
    session: SessionStore,
    browser: Option<Browser>,
}

impl OrderScraper {
    pub fn new(config: ScraperConfig) -> Self {
        let session = SessionStore::new(&config.session_file, &config.headers_file);
        Self {
            config,
            session,
            browser: None,
        }
    }

    fn get_browser(&self) -> Result<&Browser, ScraperError> {
        self.browser
            .as_ref()
            .ok_or_else(|| ScraperError::BrowserInit("Browser not initialized".to_string()))
    }

    async fn new_page(&self) -> Result<Page, ScraperError> {
        let page = self
            .get_browser()?
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;
        if self.config.debug {
            forward_console(&page).await?;
        }
        Ok(page)
    }
}

/// 展開とキャプチャ
///
/// 展開中のエラーは `Err`、出力先の書き込み失敗は `summary.aborted` に残す。
/// どちらの場合も書き込み済みの結果は `summary` に残る。
async fn run_phases(
    config: &ScraperConfig,
    driver: &dyn PageDriver,
    store: &OrderStore,
    request: &ScrapeRequest,
    sink: &mut dyn RecordSink,
    summary: &mut ScrapeSummary,
) -> Result<(), ScraperError> {
    let outcome = expand_order_list(
        driver,
        store,
        request.range.start,
        &config.load_more_text,
        &config.timings,
    )
    .await?;
    summary.expansion = Some(outcome);
    if outcome == ExpansionOutcome::Exhausted {
        info!("Order history ended before the start date; processing what was loaded");
    }

    let orders = store.snapshot();
    summary.orders_seen = orders.len();
    info!("Processing {} captured API orders...", orders.len());

    let strategy = strategy_for(config.calibration, config.timings.calibration_settle);
    let settings = CaptureSettings {
        panel_selector: config.panel_selector.clone(),
        overlay_selector: config.overlay_selector.clone(),
        screenshot_dir: config.screenshot_dir.clone(),
        timings: config.timings,
    };

    let report = CaptureLoop::new(driver, strategy.as_ref(), &settings)
        .run(orders, &request.range, &request.address_filter, sink)
        .await;
    summary.calibration = report.calibration;
    summary.captured = report.records;
    summary.missing = report.missing;
    summary.failed = report.failed;
    if let Some(reason) = report.aborted {
        error!("Aborting capture: {}", reason);
        summary.aborted = Some(reason);
    }
    Ok(())
}

#[async_trait]
impl Scraper for OrderScraper {
    async fn initialize(&mut self) -> Result<(), ScraperError> {
        info!("Initializing browser...");
        self.browser = Some(launch_browser(&self.config).await?);
        info!("Browser initialized successfully");
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<(), ScraperError> {
        if self.session.has_persisted_session() {
            info!("Found existing session at {:?}", self.config.session_file);
            return Ok(());
        }
        if self.config.headless {
            return Err(ScraperError::Session(
                "No saved session; run once without --headless to log in".to_string(),
            ));
        }

        let page = self.new_page().await?;
        let captured = self
            .session
            .capture_session(
                &page,
                &self.config.orders_url,
                self.config.session_capture_timeout,
            )
            .await;
        if let Err(e) = page.close().await {
            debug!("Failed to close login page: {}", e);
        }

        captured?;
        info!("Session captured");
        Ok(())
    }

    async fn scrape(&mut self, request: &ScrapeRequest) -> Result<ScrapeSummary, ScraperError> {
        info!(
            "Starting order scrape (API + UI) from {} to {}",
            request.range.start, request.range.end
        );

        prepare_outputs(&self.config.screenshot_dir, &self.config.csv_path)?;

        let page = self.new_page().await?;
        if !self.session.load_session(&page).await? {
            warn!("No saved session; the orders page may require login");
        }

        let store = OrderStore::new();
        let interceptor =
            spawn_interceptor(&page, store.clone(), self.config.orders_api_pattern.clone()).await?;

        let driver = ChromePage::new(page, self.config.timings.poll_interval);
        let mut sink = CsvSink::new(&self.config.csv_path);
        let mut summary = ScrapeSummary::new(request.range);

        let result = match driver.goto(&self.config.orders_url).await {
            Ok(()) => {
                run_phases(&self.config, &driver, &store, request, &mut sink, &mut summary).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("Error during scraping: {}", e);
            summary.aborted = Some(e.to_string());
        }

        interceptor.abort();
        if let Err(e) = driver.inner().clone().close().await {
            debug!("Failed to close page: {}", e);
        }

        info!(
            "Scrape finished: {} rows written to {:?}",
            sink.rows(),
            sink.path()
        );
        Ok(summary)
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        info!("Closing browser...");
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
        }
        Ok(())
    }
}
