use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScraperError;
use crate::orders::{OutputRecord, Region, ScrapeSummary};
use crate::service::ScrapeRequest;

#[async_trait]
pub trait Scraper: Send + Sync {
    /// ブラウザ初期化
    async fn initialize(&mut self) -> Result<(), ScraperError>;

    /// セッション復元（なければ対話的に取得）
    async fn authenticate(&mut self) -> Result<(), ScraperError>;

    /// 注文履歴の取得
    async fn scrape(&mut self, request: &ScrapeRequest) -> Result<ScrapeSummary, ScraperError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), ScraperError>;

    /// 一括実行（initialize → authenticate → scrape → close）
    async fn execute(&mut self, request: &ScrapeRequest) -> Result<ScrapeSummary, ScraperError> {
        self.initialize().await?;
        self.authenticate().await?;
        let summary = self.scrape(request).await?;
        self.close().await?;
        Ok(summary)
    }
}

/// ページ操作の抽象化
///
/// 操作はすべて逐次実行される前提。実装は `browser::ChromePage`。
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// ページ最下部までスクロール
    async fn scroll_to_bottom(&self) -> Result<(), ScraperError>;

    /// 表示テキストが完全一致する要素をクリック
    async fn click_text(&self, text: &str) -> Result<bool, ScraperError>;

    /// 注文IDを含むテキストノードの親要素を表示位置までスクロールしてクリック
    async fn click_order(&self, order_id: &str) -> Result<bool, ScraperError>;

    /// セレクタがDOMに出現（`present = true`）または非表示/消滅（`false`）するまで待機
    ///
    /// 条件を満たせば true、タイムアウトなら false。
    async fn wait_for_selector(
        &self,
        selector: &str,
        present: bool,
        timeout: Duration,
    ) -> Result<bool, ScraperError>;

    /// DOMが落ち着くまで待機（最大 `max`）
    async fn settle(&self, max: Duration);

    async fn viewport_size(&self) -> Result<(f64, f64), ScraperError>;

    async fn element_rect_at(&self, x: f64, y: f64) -> Result<Option<Region>, ScraperError>;

    async fn scroll_offset(&self) -> Result<(f64, f64), ScraperError>;

    /// PNGを返す。`clip` が None ならビューポート全体
    async fn screenshot(&self, clip: Option<Region>) -> Result<Vec<u8>, ScraperError>;

    async fn press_key(&self, key: &str) -> Result<(), ScraperError>;

    async fn click_selector(&self, selector: &str) -> Result<bool, ScraperError>;
}

/// 出力レコードの追記先
pub trait RecordSink: Send {
    fn append(&mut self, record: &OutputRecord) -> Result<(), ScraperError>;
}

/// 切り抜き領域の決定方法
#[async_trait]
pub trait RegionStrategy: Send + Sync {
    async fn calibrate(&self, page: &dyn PageDriver) -> Result<Region, ScraperError>;
}
