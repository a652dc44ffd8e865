//! 注文ごとの詳細パネル表示・スクリーンショット・CSV出力

use std::path::PathBuf;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::error::ScraperError;
use crate::traits::{PageDriver, RecordSink, RegionStrategy};

use super::types::{DateRange, Order, OutputRecord, Region};

/// 期間・住所で処理対象を絞り込み、新しい順に並べる
///
/// 降順ソート済みなので、終了日時より新しいものは飛ばし、開始日時より古いものが出た時点で打ち切る。
/// 日時が解釈できない注文は対象外。
pub fn select_orders(
    orders: Vec<Order>,
    range: &DateRange,
    address_filter: &str,
) -> Vec<(Order, NaiveDateTime)> {
    let mut dated: Vec<(Order, NaiveDateTime)> = orders
        .into_iter()
        .filter_map(|order| match order.placed_at() {
            Some(at) => Some((order, at)),
            None => {
                warn!(
                    "Skipping order {} with unparseable time {:?}",
                    order.order_id, order.order_time
                );
                None
            }
        })
        .collect();
    dated.sort_by(|a, b| b.1.cmp(&a.1));

    let mut selected = Vec::new();
    for (order, at) in dated {
        if at > range.end {
            continue;
        }
        if at < range.start {
            break;
        }
        if !order.delivered_to(address_filter) {
            continue;
        }
        selected.push((order, at));
    }
    selected
}

/// キャプチャループの設定
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub panel_selector: String,
    pub overlay_selector: String,
    pub screenshot_dir: PathBuf,
    pub timings: Timings,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Calibration {
    Pending,
    Locked(Region),
    /// 失敗した場合も再試行しない
    Unavailable,
}

/// キャプチャ結果
#[derive(Debug, Clone, Default)]
pub struct CaptureReport {
    pub records: Vec<OutputRecord>,
    /// DOM上に注文IDが見つからなかった注文
    pub missing: Vec<String>,
    /// 操作やスクリーンショットに失敗した注文
    pub failed: Vec<String>,
    pub calibration: Option<Region>,
    /// 出力先への書き込みに失敗して打ち切った場合の理由
    pub aborted: Option<String>,
}

pub struct CaptureLoop<'a> {
    page: &'a dyn PageDriver,
    strategy: &'a dyn RegionStrategy,
    settings: &'a CaptureSettings,
    calibration: Calibration,
    next_serial: u32,
}

impl<'a> CaptureLoop<'a> {
    pub fn new(
        page: &'a dyn PageDriver,
        strategy: &'a dyn RegionStrategy,
        settings: &'a CaptureSettings,
    ) -> Self {
        Self {
            page,
            strategy,
            settings,
            calibration: Calibration::Pending,
            next_serial: 1,
        }
    }

    pub fn calibration(&self) -> Option<Region> {
        match self.calibration {
            Calibration::Locked(region) => Some(region),
            _ => None,
        }
    }

    /// 対象注文を順に処理する。失敗した注文はログを残して次へ進む
    ///
    /// 出力先への書き込みに失敗した時点で打ち切り、それまでの結果を `aborted` 付きで返す。
    pub async fn run(
        &mut self,
        orders: Vec<Order>,
        range: &DateRange,
        address_filter: &str,
        sink: &mut dyn RecordSink,
    ) -> CaptureReport {
        let mut report = CaptureReport::default();

        for (order, placed_at) in select_orders(orders, range, address_filter) {
            info!(
                "[{}] Processing order {} ({})",
                self.next_serial,
                order.order_id,
                placed_at.date()
            );

            match self.page.click_order(&order.order_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Could not find DOM element for order {}", order.order_id);
                    report.missing.push(order.order_id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to open order {}: {}", order.order_id, e);
                    report.failed.push(order.order_id);
                    continue;
                }
            }

            match self
                .page
                .wait_for_selector(
                    &self.settings.panel_selector,
                    true,
                    self.settings.timings.panel_open_timeout,
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!("Detail panel did not appear, continuing"),
                Err(e) => debug!("Detail panel wait failed: {}", e),
            }
            self.page.settle(self.settings.timings.panel_settle).await;

            self.ensure_calibrated().await;

            let image = self.capture_receipt().await;
            self.dismiss_panel().await;

            let image = match image {
                Ok(image) => image,
                Err(e) => {
                    warn!("Screenshot failed for order {}: {}", order.order_id, e);
                    report.failed.push(order.order_id);
                    continue;
                }
            };

            let serial = self.next_serial;
            let path = self.settings.screenshot_dir.join(format!("{}.png", serial));
            if let Err(e) = tokio::fs::write(&path, &image).await {
                warn!("Failed to save screenshot {:?}: {}", path, e);
                report.failed.push(order.order_id);
                continue;
            }

            let record = OutputRecord::from_order(serial, &order, placed_at);
            if let Err(e) = sink.append(&record) {
                warn!("Failed to write row for order {}: {}", order.order_id, e);
                report.aborted = Some(e.to_string());
                break;
            }
            report.records.push(record);
            self.next_serial += 1;
        }

        report.calibration = self.calibration();
        info!(
            "Captured {} orders ({} not found in page, {} failed)",
            report.records.len(),
            report.missing.len(),
            report.failed.len()
        );
        report
    }

    async fn ensure_calibrated(&mut self) {
        if self.calibration != Calibration::Pending {
            return;
        }
        self.calibration = match self.strategy.calibrate(self.page).await {
            Ok(region) => {
                info!("Calibration locked: {:?}", region);
                Calibration::Locked(region)
            }
            Err(e) => {
                warn!("Calibration failed, capturing full viewport: {}", e);
                Calibration::Unavailable
            }
        };
    }

    /// 切り抜き撮影。失敗したらビューポート全体で撮り直す
    async fn capture_receipt(&self) -> Result<Vec<u8>, ScraperError> {
        if let Calibration::Locked(region) = self.calibration {
            if region.is_usable() {
                match self.capture_clipped(region).await {
                    Ok(image) => return Ok(image),
                    Err(e) => warn!("Clipped screenshot failed, retrying uncropped: {}", e),
                }
            }
        }
        self.page.screenshot(None).await
    }

    async fn capture_clipped(&self, region: Region) -> Result<Vec<u8>, ScraperError> {
        let (scroll_x, scroll_y) = self.page.scroll_offset().await?;
        self.page
            .screenshot(Some(region.offset(scroll_x, scroll_y)))
            .await
    }

    async fn dismiss_panel(&self) {
        if let Err(e) = self.page.press_key("Escape").await {
            debug!("Escape key failed: {}", e);
        }

        let closed = self
            .page
            .wait_for_selector(
                &self.settings.panel_selector,
                false,
                self.settings.timings.panel_close_timeout,
            )
            .await
            .unwrap_or(false);

        if !closed {
            debug!("Detail panel still open, clicking overlay");
            match self.page.click_selector(&self.settings.overlay_selector).await {
                Ok(true) => {}
                Ok(false) => debug!("Overlay {} not present", self.settings.overlay_selector),
                Err(e) => warn!("Failed to click overlay: {}", e),
            }
        }
    }
}
