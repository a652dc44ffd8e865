//! chromiumoxide によるページ操作

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, Viewport,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::orders::Region;
use crate::traits::PageDriver;

/// ネットワークアイドル待機のタイムアウト（ミリ秒）
const NETWORK_IDLE_TIMEOUT_MS: u64 = 30000;
/// ネットワークアイドル判定のインターバル（ミリ秒）
const NETWORK_IDLE_CHECK_INTERVAL_MS: u64 = 500;
/// DOM安定判定のインターバル（ミリ秒）
const STABLE_CHECK_INTERVAL_MS: u64 = 300;

/// ブラウザを起動し、イベントハンドラをバックグラウンドで回す
pub async fn launch_browser(config: &ScraperConfig) -> Result<Browser, ScraperError> {
    let unique_id = format!(
        "{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let user_data_dir = std::env::temp_dir().join(format!("order-logger-{}", unique_id));

    let (width, height) = config.window_size;
    let mut builder = BrowserConfig::builder()
        .user_data_dir(&user_data_dir)
        .window_size(width, height)
        .request_timeout(Duration::from_secs(60))
        .arg("--disable-blink-features=AutomationControlled");

    if let Some(path) = &config.chrome_executable {
        builder = builder.chrome_executable(path);
    }
    if !config.headless {
        builder = builder.with_head();
    }
    if config.debug {
        builder = builder.arg("--enable-logging=stderr").arg("--v=1");
    }

    let browser_config = builder
        .build()
        .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("Browser handler error: {:?}", e);
            }
        }
    });

    Ok(browser)
}

/// ページのconsole出力をdebugログに流す
pub async fn forward_console(page: &Page) -> Result<(), ScraperError> {
    let mut events = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let text = event
                .args
                .iter()
                .map(|arg| match (&arg.value, &arg.description) {
                    (Some(serde_json::Value::String(s)), _) => s.clone(),
                    (Some(value), _) => value.to_string(),
                    (None, Some(description)) => description.clone(),
                    (None, None) => String::new(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            debug!("PAGE LOG: {}", text);
        }
    });
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbedElement {
    found: bool,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
}

/// `PageDriver` の chromiumoxide 実装
pub struct ChromePage {
    page: Page,
    poll_interval: Duration,
}

impl ChromePage {
    pub fn new(page: Page, poll_interval: Duration) -> Self {
        Self {
            page,
            poll_interval,
        }
    }

    pub fn inner(&self) -> &Page {
        &self.page
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T, ScraperError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| ScraperError::JavaScript(e.to_string()))
    }

    async fn run(&self, script: &str) -> Result<(), ScraperError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        Ok(())
    }

    /// URLへ移動し、ネットワークが落ち着くまで待つ
    pub async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        info!("Navigating to {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| ScraperError::Navigation(e.to_string()))?;
        self.wait_request_idle().await;
        Ok(())
    }

    /// ネットワークリクエストがアイドル状態になるまで待機
    pub async fn wait_request_idle(&self) {
        debug!("Waiting for network to become idle...");
        let start = Instant::now();
        let timeout = Duration::from_millis(NETWORK_IDLE_TIMEOUT_MS);

        let mut idle_count = 0;
        const REQUIRED_IDLE_CHECKS: u32 = 3;

        while start.elapsed() < timeout {
            let result = self
                .eval::<bool>(
                    r#"
                    (() => {
                        const entries = performance.getEntriesByType('resource');
                        const now = performance.now();
                        const recent = entries.filter(e => (now - e.startTime) < 500 && e.duration === 0);
                        return recent.length === 0 && document.readyState === 'complete';
                    })()
                "#,
                )
                .await;

            match result {
                Ok(true) => {
                    idle_count += 1;
                    if idle_count >= REQUIRED_IDLE_CHECKS {
                        debug!("Network idle after {:?}", start.elapsed());
                        return;
                    }
                }
                Ok(false) => idle_count = 0,
                Err(e) => {
                    debug!("Network idle check error: {}", e);
                    idle_count = 0;
                }
            }

            sleep(Duration::from_millis(NETWORK_IDLE_CHECK_INTERVAL_MS)).await;
        }

        warn!(
            "Network idle timeout after {:?}, proceeding anyway",
            start.elapsed()
        );
    }
}

/// 要素の存在と可視状態を返すスクリプト
///
/// 可視: visibility が hidden/collapse でなく、display が none でなく、幅と高さがともに正。
fn selector_state_script(selector: &str) -> String {
    format!(
        r#"
        (function() {{
            const el = document.querySelector({});
            if (!el) return {{ attached: false, visible: false }};
            const style = window.getComputedStyle(el);
            const rect = el.getBoundingClientRect();
            const visible = style.visibility !== 'hidden' && style.visibility !== 'collapse'
                && style.display !== 'none'
                && rect.width > 0 && rect.height > 0;
            return {{ attached: true, visible: visible }};
        }})()
        "#,
        js_string(selector)
    )
}

#[derive(Debug, Deserialize)]
struct SelectorState {
    attached: bool,
    visible: bool,
}

impl SelectorState {
    /// `present` なら存在すれば成立。そうでなければ存在しないか見えていなければ成立
    fn satisfies(&self, present: bool) -> bool {
        if present {
            self.attached
        } else {
            !self.attached || !self.visible
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn key_code(key: &str) -> Option<i64> {
    match key {
        "Escape" => Some(27),
        "Enter" => Some(13),
        "Tab" => Some(9),
        _ => None,
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn scroll_to_bottom(&self) -> Result<(), ScraperError> {
        self.run("window.scrollTo(0, document.body.scrollHeight)").await
    }

    async fn click_text(&self, text: &str) -> Result<bool, ScraperError> {
        let script = format!(
            r#"
            (function() {{
                const target = {};
                const candidates = document.querySelectorAll('div, span, button');
                for (const el of candidates) {{
                    if (el.textContent && el.textContent.trim() === target) {{
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()
            "#,
            js_string(text)
        );
        self.eval(&script).await
    }

    async fn click_order(&self, order_id: &str) -> Result<bool, ScraperError> {
        let script = format!(
            r#"
            (function() {{
                const oid = {};
                const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, null);
                let node;
                while ((node = walker.nextNode())) {{
                    if (node.nodeValue && node.nodeValue.includes(oid) && node.parentElement) {{
                        const el = node.parentElement;
                        console.log('Found order element: ' + el.tagName);
                        el.scrollIntoView({{ block: 'center' }});
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()
            "#,
            js_string(order_id)
        );
        self.eval(&script).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        present: bool,
        timeout: Duration,
    ) -> Result<bool, ScraperError> {
        let script = selector_state_script(selector);

        let start = Instant::now();
        loop {
            let state: SelectorState = self.eval(&script).await?;
            let satisfied = state.satisfies(present);
            if satisfied {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                debug!("Timed out waiting for {} (present={})", selector, present);
                return Ok(false);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// DOMの長さが連続して変わらなくなるまで待つ。上限 `max` に達したらそのまま進む
    async fn settle(&self, max: Duration) {
        let start = Instant::now();
        let mut last_len: Option<usize> = None;
        let mut stable_count = 0;
        const REQUIRED_STABLE_CHECKS: u32 = 3;

        while start.elapsed() < max {
            match self
                .eval::<usize>("document.documentElement.outerHTML.length")
                .await
            {
                Ok(len) => {
                    if last_len == Some(len) {
                        stable_count += 1;
                        if stable_count >= REQUIRED_STABLE_CHECKS {
                            debug!("Page stable after {:?}", start.elapsed());
                            return;
                        }
                    } else {
                        stable_count = 0;
                    }
                    last_len = Some(len);
                }
                Err(e) => {
                    debug!("Page stable check error: {}", e);
                    stable_count = 0;
                }
            }
            let remaining = max.saturating_sub(start.elapsed());
            sleep(Duration::from_millis(STABLE_CHECK_INTERVAL_MS).min(remaining)).await;
        }
    }

    async fn viewport_size(&self) -> Result<(f64, f64), ScraperError> {
        self.eval("[window.innerWidth, window.innerHeight]").await
    }

    async fn element_rect_at(&self, x: f64, y: f64) -> Result<Option<Region>, ScraperError> {
        let script = format!(
            r#"
            (function() {{
                const el = document.elementFromPoint({}, {});
                if (!el) return {{ found: false }};
                const rect = el.getBoundingClientRect();
                return {{
                    found: true,
                    tag: el.tagName + (el.className ? '.' + el.className : ''),
                    x: rect.x, y: rect.y, width: rect.width, height: rect.height
                }};
            }})()
            "#,
            x, y
        );
        let probed: ProbedElement = self.eval(&script).await?;
        if !probed.found {
            return Ok(None);
        }
        debug!("Element at ({}, {}): {}", x, y, probed.tag);
        Ok(Some(Region {
            x: probed.x,
            y: probed.y,
            width: probed.width,
            height: probed.height,
        }))
    }

    async fn scroll_offset(&self) -> Result<(f64, f64), ScraperError> {
        self.eval("[window.scrollX, window.scrollY]").await
    }

    async fn screenshot(&self, clip: Option<Region>) -> Result<Vec<u8>, ScraperError> {
        let mut builder = CaptureScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if let Some(region) = clip {
            builder = builder.clip(Viewport {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                scale: 1.0,
            });
        }

        let resp = self
            .page
            .execute(builder.build())
            .await
            .map_err(|e| ScraperError::Screenshot(e.to_string()))?;
        let data_b64: &str = resp.data.as_ref();
        base64::engine::general_purpose::STANDARD
            .decode(data_b64.as_bytes())
            .map_err(|e| ScraperError::Screenshot(format!("base64 decode failed: {}", e)))
    }

    async fn press_key(&self, key: &str) -> Result<(), ScraperError> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .code(key);
            if let Some(code) = key_code(key) {
                builder = builder.windows_virtual_key_code(code);
            }
            let params = builder.build().map_err(ScraperError::JavaScript)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        }
        Ok(())
    }

    async fn click_selector(&self, selector: &str) -> Result<bool, ScraperError> {
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element
            .click()
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", selector, e)))?;
        Ok(true)
    }
}
