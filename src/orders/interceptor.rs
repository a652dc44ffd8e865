//! 注文一覧APIレスポンスの傍受

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::stream::{PollNext, Stream};
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ScraperError;

use super::store::OrderStore;
use super::types::Order;

#[derive(Debug, Deserialize)]
struct OrdersEnvelope {
    #[serde(rename = "statusCode")]
    status_code: i64,
    data: Option<OrdersData>,
}

#[derive(Debug, Deserialize)]
struct OrdersData {
    orders: Vec<serde_json::Value>,
}

/// 注文一覧APIへのGETかどうか
pub fn is_orders_request(url: &str, method: &str, api_pattern: &str) -> bool {
    url.contains(api_pattern) && method.eq_ignore_ascii_case("GET")
}

/// `{statusCode: 0, data: {orders: [...]}}` 形式のボディから注文を取り出す
///
/// 形式が違う場合は None。個々の注文が壊れている場合はその注文だけ捨てる。
pub fn parse_orders_payload(body: &str) -> Option<Vec<Order>> {
    let envelope: OrdersEnvelope = serde_json::from_str(body).ok()?;
    if envelope.status_code != 0 {
        return None;
    }
    let orders = envelope
        .data?
        .orders
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Order>(value) {
            Ok(order) => Some(order),
            Err(e) => {
                debug!("Skipping malformed order entry: {}", e);
                None
            }
        })
        .collect();
    Some(orders)
}

/// レスポンスボディをストアにマージ。マージした件数を返す
pub fn ingest_body(store: &OrderStore, body: &str) -> Option<usize> {
    let orders = parse_orders_payload(body)?;
    let count = orders.len();
    store.merge_all(orders);
    Some(count)
}

/// 2つのストリームを合流させる。`requests` に溜まっているものを常に先に取り出す
///
/// `requestWillBeSent` は同じリクエストの `loadingFinished` より先に届くので、
/// 完了イベントを読む時点で対応するリクエストは必ず処理済みになる。
fn requests_first<T>(
    requests: impl Stream<Item = T>,
    others: impl Stream<Item = T>,
) -> impl Stream<Item = T> {
    futures::stream::select_with_strategy(requests, others, |_: &mut ()| PollNext::Left)
}

enum NetworkEvent {
    Request(Arc<EventRequestWillBeSent>),
    Finished(Arc<EventLoadingFinished>),
    Failed(Arc<EventLoadingFailed>),
}

/// ページのネットワークイベントを購読し、注文一覧APIのレスポンスをストアに流し込むタスクを起動
///
/// ボディの取得やパースに失敗したレスポンスは黙って無視する。
pub async fn spawn_interceptor(
    page: &Page,
    store: OrderStore,
    api_pattern: String,
) -> Result<JoinHandle<()>, ScraperError> {
    let requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| ScraperError::BrowserInit(format!("request listener: {}", e)))?;
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(|e| ScraperError::BrowserInit(format!("loading listener: {}", e)))?;
    let failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(|e| ScraperError::BrowserInit(format!("loading listener: {}", e)))?;

    let page = page.clone();

    Ok(tokio::spawn(async move {
        let events = requests_first(
            requests.map(NetworkEvent::Request),
            futures::stream::select(
                finished.map(NetworkEvent::Finished),
                failed.map(NetworkEvent::Failed),
            ),
        );
        let mut events = std::pin::pin!(events);
        let mut pending: HashSet<String> = HashSet::new();

        while let Some(event) = events.next().await {
            match event {
                NetworkEvent::Request(event) => {
                    if is_orders_request(&event.request.url, &event.request.method, &api_pattern) {
                        debug!("Orders API request: {}", event.request.url);
                        pending.insert(event.request_id.inner().clone());
                    }
                }
                NetworkEvent::Failed(event) => {
                    pending.remove(event.request_id.inner());
                }
                NetworkEvent::Finished(event) => {
                    if !pending.remove(event.request_id.inner()) {
                        continue;
                    }
                    debug!("Orders API response finished: {}", event.request_id.inner());
                    let body = match page
                        .execute(GetResponseBodyParams::new(event.request_id.clone()))
                        .await
                    {
                        Ok(resp) if resp.result.base64_encoded => {
                            match base64::engine::general_purpose::STANDARD
                                .decode(resp.result.body.as_bytes())
                            {
                                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                                Err(e) => {
                                    debug!("Failed to decode response body: {}", e);
                                    continue;
                                }
                            }
                        }
                        Ok(resp) => resp.result.body.clone(),
                        Err(e) => {
                            debug!("Failed to read response body: {}", e);
                            continue;
                        }
                    };

                    if let Some(count) = ingest_body(&store, &body) {
                        info!(
                            "Interceptor: captured {} orders from API ({} total)",
                            count,
                            store.len()
                        );
                    }
                }
            }
        }
        debug!("Network event stream closed");
    }))
}
