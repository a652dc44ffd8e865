//! 注文関連の型定義

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// 注文明細の1品目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
}

/// 配達先
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeliveryAddress {
    #[serde(default)]
    pub address: String,
}

/// 注文一覧APIが返す注文レコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// 数値で返ってきた場合も文字列にそろえる
    #[serde(deserialize_with = "string_or_number")]
    pub order_id: String,
    pub order_time: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub order_total: f64,
    #[serde(default)]
    pub restaurant_name: String,
    #[serde(default)]
    pub order_items: Vec<OrderItem>,
    #[serde(default)]
    pub delivery_address: DeliveryAddress,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("expected string or number, got {}", other))),
    }
}

/// 金額。数値・数値文字列・null を受け付ける
fn lenient_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("amount out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| D::Error::custom(format!("invalid amount {:?}: {}", s, e))),
        other => Err(D::Error::custom(format!("invalid amount: {}", other))),
    }
}

impl Order {
    /// 注文日時（ローカル時刻）。解釈できない場合は None
    pub fn placed_at(&self) -> Option<NaiveDateTime> {
        parse_order_time(&self.order_time)
    }

    pub fn first_item_name(&self) -> Option<&str> {
        self.order_items.first().map(|item| item.name.as_str())
    }

    /// 住所フィルタ。正規化なしの部分一致
    pub fn delivered_to(&self, fragment: &str) -> bool {
        self.delivery_address.address.contains(fragment)
    }
}

/// 注文日時文字列をパース
///
/// APIは `2024-01-10 19:45:12` 形式（ローカル時刻）を返す。RFC 3339 と日付のみも受け付ける。
pub fn parse_order_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// CSVの日付列 (例: `Jan 05 2024`)
pub fn human_date(at: NaiveDateTime) -> String {
    at.format("%b %d %Y").to_string()
}

/// 取得対象期間（両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// 開始日の0時から現在時刻まで
    pub fn since(start: NaiveDate) -> Self {
        Self {
            start: start.and_time(chrono::NaiveTime::MIN),
            end: Local::now().naive_local(),
        }
    }

    /// 過去N日間（時刻は現在のまま）
    pub fn last_days(days: i64) -> Self {
        let end = Local::now().naive_local();
        Self {
            start: end - chrono::Duration::days(days),
            end,
        }
    }
}

/// スクリーンショットの切り抜き領域（ページ座標）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn is_usable(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// CSV 1行分の出力レコード
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    #[serde(rename = "Serial")]
    pub serial: u32,
    #[serde(rename = "Items")]
    pub items: String,
    #[serde(rename = "Order ID")]
    pub order_id: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Amount", serialize_with = "plain_number")]
    pub amount: f64,
    #[serde(rename = "Total", serialize_with = "plain_number")]
    pub total: f64,
    #[serde(rename = "Restaurant")]
    pub restaurant: String,
}

/// `245.0` ではなく `245` と書く
fn plain_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

impl OutputRecord {
    pub fn from_order(serial: u32, order: &Order, placed_at: NaiveDateTime) -> Self {
        Self {
            serial,
            items: order.first_item_name().unwrap_or_default().to_string(),
            order_id: order.order_id.clone(),
            date: human_date(placed_at),
            amount: order.order_total,
            total: order.order_total,
            restaurant: order.restaurant_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_order_id_and_string_total() {
        let order: Order = serde_json::from_str(
            r#"{"order_id": 171234567890, "order_time": "2024-01-10 19:45:12",
                "order_total": "245.50", "restaurant_name": "Dosa Hut"}"#,
        )
        .unwrap();
        assert_eq!(order.order_id, "171234567890");
        assert_eq!(order.order_total, 245.5);

        let order: Order = serde_json::from_str(
            r#"{"order_id": "ID1", "order_time": "2024-01-10", "order_total": null}"#,
        )
        .unwrap();
        assert_eq!(order.order_total, 0.0);

        assert!(serde_json::from_str::<Order>(
            r#"{"order_id": {"nested": true}, "order_time": "2024-01-10"}"#
        )
        .is_err());
    }

    #[test]
    fn test_parse_order_time_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(19, 45, 12)
            .unwrap();
        assert_eq!(parse_order_time("2024-01-10 19:45:12"), Some(expected));
        assert_eq!(parse_order_time("2024-01-10T19:45:12"), Some(expected));
        assert_eq!(
            parse_order_time("2024-01-10"),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(0, 0, 0)
        );
        assert!(parse_order_time("2024-01-10T19:45:12+05:30").is_some());
        assert_eq!(parse_order_time("yesterday"), None);
    }

    #[test]
    fn test_human_date_pads_day() {
        let at = parse_order_time("2024-01-05 08:00:00").unwrap();
        assert_eq!(human_date(at), "Jan 05 2024");
    }

    #[test]
    fn test_order_deserialize_from_api_shape() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "order_id": "171234",
            "order_time": "2024-01-10 19:45:12",
            "order_total": 412.5,
            "restaurant_name": "Burger Point",
            "order_items": [{"name": "Veg Burger", "quantity": "2"}, {"name": "Fries"}],
            "delivery_address": {"address": "12, Defence Colony, New Delhi", "lat": "28.57"},
            "payment_method": "UPI"
        }))
        .unwrap();

        assert_eq!(order.first_item_name(), Some("Veg Burger"));
        assert!(order.delivered_to("Defence Colony"));
        assert!(!order.delivered_to("defence colony"));
    }

    #[test]
    fn test_output_record_uses_first_item_and_total() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "order_id": "9",
            "order_time": "2024-01-05 12:00:00",
            "order_total": 245.0,
            "restaurant_name": "Dosa Hut",
            "order_items": [{"name": "Masala Dosa"}, {"name": "Coffee"}],
        }))
        .unwrap();

        let record = OutputRecord::from_order(3, &order, order.placed_at().unwrap());
        assert_eq!(record.serial, 3);
        assert_eq!(record.items, "Masala Dosa");
        assert_eq!(record.date, "Jan 05 2024");
        assert_eq!(record.amount, record.total);
        assert_eq!(record.restaurant, "Dosa Hut");
    }

    #[test]
    fn test_region_usable_and_offset() {
        let region = Region {
            x: 900.0,
            y: 10.0,
            width: 500.0,
            height: 800.0,
        };
        assert!(region.is_usable());
        assert_eq!(region.offset(0.0, 120.0).y, 130.0);
        assert!(!Region { width: 0.0, ..region }.is_usable());
    }
}
