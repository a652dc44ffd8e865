//! レシート切り抜き領域のキャリブレーション

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::CalibrationMode;
use crate::error::ScraperError;
use crate::traits::{PageDriver, RegionStrategy};

use super::types::Region;

/// ビューポート右下付近 `(width - inset, height - inset)` にある要素の矩形を使う
///
/// 詳細パネルが常にその位置を占めている前提のヒューリスティック。
/// 要素がなければビューポート右端の帯（全高・固定幅）を返す。
#[derive(Debug, Clone, Copy)]
pub struct CornerProbe {
    pub settle: Duration,
    pub inset: f64,
    pub fallback_width: f64,
}

#[async_trait]
impl RegionStrategy for CornerProbe {
    async fn calibrate(&self, page: &dyn PageDriver) -> Result<Region, ScraperError> {
        info!("Auto-calibration: probing bottom-right of viewport");
        sleep(self.settle).await;

        let (width, height) = page.viewport_size().await?;
        let (x, y) = (width - self.inset, height - self.inset);

        match page.element_rect_at(x, y).await? {
            Some(region) => Ok(region),
            None => {
                warn!("No element found at ({}, {}), using right-hand strip", x, y);
                Ok(Region {
                    x: width - self.fallback_width,
                    y: 0.0,
                    width: self.fallback_width,
                    height,
                })
            }
        }
    }
}

/// 設定で与えた固定領域
#[derive(Debug, Clone, Copy)]
pub struct FixedRegion(pub Region);

#[async_trait]
impl RegionStrategy for FixedRegion {
    async fn calibrate(&self, _page: &dyn PageDriver) -> Result<Region, ScraperError> {
        Ok(self.0)
    }
}

pub fn strategy_for(mode: CalibrationMode, settle: Duration) -> Box<dyn RegionStrategy> {
    match mode {
        CalibrationMode::CornerProbe {
            inset,
            fallback_width,
        } => Box::new(CornerProbe {
            settle,
            inset,
            fallback_width,
        }),
        CalibrationMode::Fixed(region) => Box::new(FixedRegion(region)),
    }
}
