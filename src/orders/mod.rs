//! 注文履歴スクレイパーモジュール
//!
//! 注文一覧APIのレスポンスを傍受して蓄積し、画面上の注文と突き合わせてレシートを撮影する

mod calibration;
mod capture;
mod expansion;
mod interceptor;
mod scraper;
mod store;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use calibration::{strategy_for, CornerProbe, FixedRegion};
pub use capture::{select_orders, CaptureLoop, CaptureReport, CaptureSettings};
pub use expansion::{expand_order_list, ExpansionOutcome};
pub use interceptor::{ingest_body, is_orders_request, parse_orders_payload, spawn_interceptor};
pub use scraper::{OrderScraper, ScrapeSummary};
pub use store::OrderStore;
pub use types::{
    human_date, parse_order_time, DateRange, DeliveryAddress, Order, OrderItem, OutputRecord,
    Region,
};
