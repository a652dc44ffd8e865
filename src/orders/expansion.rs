//! 注文一覧の展開（「さらに表示」の繰り返し）

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::config::Timings;
use crate::error::ScraperError;
use crate::traits::PageDriver;

use super::store::OrderStore;

/// 展開の終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionOutcome {
    /// 最後に取り込んだ注文が開始日時より前に到達
    ReachedBoundary,
    /// 「さらに表示」が見つからない（履歴の終端）
    Exhausted,
}

/// 開始日時より古い注文がAPIから届くまで一覧を展開する
///
/// 判定に使うのはストアに最後に挿入された注文で、真の最古ではない。
/// APIが時系列順に返さない場合は早期終了・無限ループのどちらもありうる。
pub async fn expand_order_list(
    page: &dyn PageDriver,
    store: &OrderStore,
    start: NaiveDateTime,
    load_more_text: &str,
    timings: &Timings,
) -> Result<ExpansionOutcome, ScraperError> {
    info!("Expanding order list until {} is reached in API data...", start);

    loop {
        if let Some(frontier) = store.frontier() {
            match frontier.placed_at() {
                Some(at) => {
                    debug!("Oldest API order so far: {} ({})", at, frontier.order_id);
                    if at < start {
                        info!("Start boundary reached with {} orders captured", store.len());
                        return Ok(ExpansionOutcome::ReachedBoundary);
                    }
                }
                None => debug!(
                    "Frontier order {} has unparseable time {:?}",
                    frontier.order_id, frontier.order_time
                ),
            }
        }

        page.scroll_to_bottom().await?;
        page.settle(timings.scroll_settle).await;

        let revision = store.revision();
        if page.click_text(load_more_text).await? {
            info!("Clicked {:?}", load_more_text);
            if !store
                .wait_for_revision_after(revision, timings.load_more_settle, timings.poll_interval)
                .await
            {
                debug!("No new API response within {:?}", timings.load_more_settle);
            }
        } else {
            info!("No {:?} button found, assuming end of list", load_more_text);
            return Ok(ExpansionOutcome::Exhausted);
        }
    }
}
