//! 傍受した注文の蓄積先
//!
//! 書き込みはインターセプタのタスクのみ。拡張ドライバとキャプチャループは読み取りだけ行う。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::time::sleep;

use super::types::Order;

#[derive(Debug, Default)]
struct Inner {
    orders: Vec<Order>,
    index: HashMap<String, usize>,
    revision: u64,
}

/// `order_id` をキーとする挿入順保持のストア
///
/// 同じIDを再度マージすると、位置はそのままで内容だけ上書きされる。
#[derive(Debug, Clone, Default)]
pub struct OrderStore {
    inner: Arc<Mutex<Inner>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn merge(&self, order: Order) {
        self.merge_all(std::iter::once(order));
    }

    /// まとめてマージし、新規に追加された件数を返す
    pub fn merge_all(&self, orders: impl IntoIterator<Item = Order>) -> usize {
        let mut inner = self.lock();
        let mut added = 0;
        for order in orders {
            match inner.index.get(&order.order_id).copied() {
                Some(pos) => inner.orders[pos] = order,
                None => {
                    let pos = inner.orders.len();
                    inner.index.insert(order.order_id.clone(), pos);
                    inner.orders.push(order);
                    added += 1;
                }
            }
        }
        inner.revision += 1;
        added
    }

    pub fn len(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().orders.is_empty()
    }

    pub fn get(&self, order_id: &str) -> Option<Order> {
        let inner = self.lock();
        inner.index.get(order_id).map(|&pos| inner.orders[pos].clone())
    }

    /// 最後に挿入された注文（時系列の最小値ではない）
    pub fn frontier(&self) -> Option<Order> {
        self.lock().orders.last().cloned()
    }

    /// 挿入順のスナップショット
    pub fn snapshot(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    /// マージが行われるたびに増えるカウンタ
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// `revision` より後のマージを待つ。`timeout` 内に来れば true
    pub async fn wait_for_revision_after(
        &self,
        revision: u64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let start = Instant::now();
        loop {
            if self.revision() > revision {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            sleep(poll_interval.min(timeout.saturating_sub(start.elapsed()))).await;
        }
    }
}
