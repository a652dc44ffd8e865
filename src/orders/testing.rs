//! テスト用のページ・出力先

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScraperError;
use crate::traits::{PageDriver, RecordSink};

use super::store::OrderStore;
use super::types::{DeliveryAddress, Order, OrderItem, OutputRecord, Region};

pub fn order(id: &str, time: &str, address: &str) -> Order {
    Order {
        order_id: id.to_string(),
        order_time: time.to_string(),
        order_total: 100.0,
        restaurant_name: format!("Restaurant {}", id),
        order_items: vec![OrderItem {
            name: format!("Item {}", id),
        }],
        delivery_address: DeliveryAddress {
            address: address.to_string(),
        },
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub records: Vec<OutputRecord>,
    /// この件数を書いた後の追記はエラーにする
    pub fail_after: Option<usize>,
}

impl MemorySink {
    pub fn failing_after(rows: usize) -> Self {
        Self {
            records: Vec::new(),
            fail_after: Some(rows),
        }
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &OutputRecord) -> Result<(), ScraperError> {
        if self.fail_after.is_some_and(|limit| self.records.len() >= limit) {
            return Err(ScraperError::FileIO(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.records.push(record.clone());
        Ok(())
    }
}

/// 記録用のページ操作ログ
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ScrollToBottom,
    ClickText(String),
    ClickOrder(String),
    Screenshot(Option<Region>),
    PressKey(String),
    ClickSelector(String),
    ProbeAt(f64, f64),
}

/// 「さらに表示」を押すたびに次のページの注文をストアへ流し込む偽ページ
pub struct FakePage {
    pub store: OrderStore,
    pub pages: Mutex<VecDeque<Vec<Order>>>,
    pub load_more_text: String,
    pub rendered_ids: Mutex<HashSet<String>>,
    pub viewport: (f64, f64),
    pub scroll: (f64, f64),
    /// `element_rect_at` が呼ばれるたびに先頭から返す
    pub probe_results: Mutex<VecDeque<Option<Region>>>,
    pub fail_clipped_screenshots: bool,
    pub fail_all_screenshots: bool,
    pub panel_closes: bool,
    pub actions: Mutex<Vec<Action>>,
}

impl FakePage {
    pub fn new(store: OrderStore) -> Self {
        Self {
            store,
            pages: Mutex::new(VecDeque::new()),
            load_more_text: "Show More Orders".to_string(),
            rendered_ids: Mutex::new(HashSet::new()),
            viewport: (1440.0, 900.0),
            scroll: (0.0, 0.0),
            probe_results: Mutex::new(VecDeque::new()),
            fail_clipped_screenshots: false,
            fail_all_screenshots: false,
            panel_closes: true,
            actions: Mutex::new(Vec::new()),
        }
    }

    /// 初期表示分としてストアに入れ、DOMにも描画済みとする
    pub fn with_initial(self, orders: Vec<Order>) -> Self {
        self.render(&orders);
        self.store.merge_all(orders);
        self
    }

    pub fn with_more_pages(self, pages: Vec<Vec<Order>>) -> Self {
        self.pages.lock().unwrap().extend(pages);
        self
    }

    pub fn with_probe_results(self, results: Vec<Option<Region>>) -> Self {
        self.probe_results.lock().unwrap().extend(results);
        self
    }

    pub fn hide_from_dom(&self, order_id: &str) {
        self.rendered_ids.lock().unwrap().remove(order_id);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.actions.lock().unwrap().iter().filter(|a| pred(a)).count()
    }

    fn render(&self, orders: &[Order]) {
        let mut ids = self.rendered_ids.lock().unwrap();
        ids.extend(orders.iter().map(|o| o.order_id.clone()));
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn scroll_to_bottom(&self) -> Result<(), ScraperError> {
        self.record(Action::ScrollToBottom);
        Ok(())
    }

    async fn click_text(&self, text: &str) -> Result<bool, ScraperError> {
        self.record(Action::ClickText(text.to_string()));
        if text != self.load_more_text {
            return Ok(false);
        }
        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(orders) => {
                self.render(&orders);
                self.store.merge_all(orders);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn click_order(&self, order_id: &str) -> Result<bool, ScraperError> {
        self.record(Action::ClickOrder(order_id.to_string()));
        Ok(self.rendered_ids.lock().unwrap().contains(order_id))
    }

    async fn wait_for_selector(
        &self,
        _selector: &str,
        present: bool,
        _timeout: Duration,
    ) -> Result<bool, ScraperError> {
        Ok(present || self.panel_closes)
    }

    async fn settle(&self, _max: Duration) {}

    async fn viewport_size(&self) -> Result<(f64, f64), ScraperError> {
        Ok(self.viewport)
    }

    async fn element_rect_at(&self, x: f64, y: f64) -> Result<Option<Region>, ScraperError> {
        self.record(Action::ProbeAt(x, y));
        Ok(self.probe_results.lock().unwrap().pop_front().flatten())
    }

    async fn scroll_offset(&self) -> Result<(f64, f64), ScraperError> {
        Ok(self.scroll)
    }

    async fn screenshot(&self, clip: Option<Region>) -> Result<Vec<u8>, ScraperError> {
        self.record(Action::Screenshot(clip));
        if self.fail_all_screenshots || (clip.is_some() && self.fail_clipped_screenshots) {
            return Err(ScraperError::Screenshot("capture failed".to_string()));
        }
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn press_key(&self, key: &str) -> Result<(), ScraperError> {
        self.record(Action::PressKey(key.to_string()));
        Ok(())
    }

    async fn click_selector(&self, selector: &str) -> Result<bool, ScraperError> {
        self.record(Action::ClickSelector(selector.to_string()));
        Ok(true)
    }
}
