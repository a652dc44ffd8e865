//! セッション（Cookie・リクエストヘッダ）の保存と復元

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, EventRequestWillBeSent, SetCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::Page;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ScraperError;

/// ログイン完了の目印とするAPIパス
const SESSION_API_PATTERNS: [&str; 2] = ["/dapi/order/all", "/api/v1/orders"];

/// 保存形式のCookie（puppeteerの `page.cookies()` と互換）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl From<&Cookie> for StoredCookie {
    fn from(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            expires: cookie.expires,
            http_only: cookie.http_only,
            secure: cookie.secure,
            same_site: cookie
                .same_site
                .as_ref()
                .and_then(|same_site| serde_json::to_value(same_site).ok())
                .and_then(|value| value.as_str().map(str::to_string)),
        }
    }
}

impl StoredCookie {
    /// `expires` が正のときだけ期限を付ける（-1 はセッションCookie）
    pub fn to_param(&self) -> Result<CookieParam, ScraperError> {
        let mut builder = CookieParam::builder()
            .name(&self.name)
            .value(&self.value)
            .domain(&self.domain)
            .path(&self.path)
            .secure(self.secure)
            .http_only(self.http_only);
        if self.expires > 0.0 {
            builder = builder.expires(TimeSinceEpoch::new(self.expires));
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(parse_same_site) {
            builder = builder.same_site(same_site);
        }
        builder
            .build()
            .map_err(|e| ScraperError::Session(format!("cookie {}: {}", self.name, e)))
    }
}

fn parse_same_site(raw: &str) -> Option<CookieSameSite> {
    match serde_json::from_value(Value::String(raw.to_string())) {
        Ok(same_site) => Some(same_site),
        Err(_) => {
            debug!("Ignoring unknown sameSite {:?}", raw);
            None
        }
    }
}

pub fn is_session_request(url: &str) -> bool {
    SESSION_API_PATTERNS.iter().any(|pattern| url.contains(pattern))
}

/// `(URL, ヘッダ)` の列から注文APIへのリクエストを待ち、そのヘッダを返す
async fn wait_for_session_request<H>(
    requests: impl Stream<Item = (String, H)>,
    timeout: Duration,
) -> Result<H, ScraperError> {
    let mut requests = std::pin::pin!(requests);
    let found = tokio::time::timeout(timeout, async {
        while let Some((url, headers)) = requests.next().await {
            if is_session_request(&url) {
                return Some(headers);
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(headers)) => Ok(headers),
        Ok(None) => Err(ScraperError::Session(
            "Request stream closed before the orders API was called".to_string(),
        )),
        Err(_) => Err(ScraperError::Timeout(format!(
            "login not completed within {:?}",
            timeout
        ))),
    }
}

/// Cookieファイルとヘッダファイルの置き場所
#[derive(Debug, Clone)]
pub struct SessionStore {
    cookie_file: PathBuf,
    headers_file: PathBuf,
}

impl SessionStore {
    pub fn new(cookie_file: impl Into<PathBuf>, headers_file: impl Into<PathBuf>) -> Self {
        Self {
            cookie_file: cookie_file.into(),
            headers_file: headers_file.into(),
        }
    }

    pub fn has_persisted_session(&self) -> bool {
        self.cookie_file.exists()
    }

    pub fn read_cookies(&self) -> Result<Vec<StoredCookie>, ScraperError> {
        let json = std::fs::read_to_string(&self.cookie_file)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn write_cookies(&self, cookies: &[StoredCookie]) -> Result<(), ScraperError> {
        std::fs::write(&self.cookie_file, serde_json::to_string_pretty(cookies)?)?;
        Ok(())
    }

    /// 保存済みCookieを設定用パラメータに変換。壊れたCookieは飛ばす
    pub fn cookie_params(&self) -> Result<Vec<CookieParam>, ScraperError> {
        Ok(self
            .read_cookies()?
            .iter()
            .filter_map(|cookie| match cookie.to_param() {
                Ok(param) => Some(param),
                Err(e) => {
                    debug!("Skipping cookie: {}", e);
                    None
                }
            })
            .collect())
    }

    /// 保存済みCookieをページに設定。ファイルがなければ false
    pub async fn load_session(&self, page: &Page) -> Result<bool, ScraperError> {
        if !self.has_persisted_session() {
            return Ok(false);
        }

        let params = self.cookie_params()?;
        let count = params.len();

        // Page::set_cookies は about:blank では失敗するため、ドメイン指定のままCDPで直接設定する
        page.execute(SetCookiesParams::new(params))
            .await
            .map_err(|e| ScraperError::Session(format!("Cookie設定失敗: {}", e)))?;
        info!("Loaded {} cookies from {:?}", count, self.cookie_file);
        Ok(true)
    }

    /// 注文ページを開き、ユーザーのログインを待ってセッションを保存する
    ///
    /// 注文APIへのリクエストを検出したらヘッダとCookieを保存する。
    /// `timeout` 内に検出できなければ `ScraperError::Timeout`。
    pub async fn capture_session(
        &self,
        page: &Page,
        orders_url: &str,
        timeout: Duration,
    ) -> Result<(), ScraperError> {
        info!("No session found. Please log in and open the Orders page in the browser window.");

        let requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| ScraperError::Session(e.to_string()))?;

        page.goto(orders_url)
            .await
            .map_err(|e| ScraperError::Navigation(e.to_string()))?;

        info!("Waiting for login and session capture (up to {:?})...", timeout);
        let headers = wait_for_session_request(
            requests.map(|event| (event.request.url.clone(), event.request.headers.clone())),
            timeout,
        )
        .await
        .map_err(|e| {
            warn!("Session capture failed: {}", e);
            e
        })?;

        info!("Captured orders API request, saving headers to {:?}", self.headers_file);
        std::fs::write(&self.headers_file, serde_json::to_string_pretty(&headers)?)?;

        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| ScraperError::Session(format!("Cookie取得失敗: {}", e)))?;
        let stored: Vec<StoredCookie> = cookies.iter().map(StoredCookie::from).collect();
        self.write_cookies(&stored)?;

        info!("Saved {} cookies to {:?}", stored.len(), self.cookie_file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_session_request() {
        assert!(is_session_request("https://www.swiggy.com/dapi/order/all?order_id="));
        assert!(is_session_request("https://www.swiggy.com/api/v1/orders/recent"));
        assert!(!is_session_request("https://www.swiggy.com/dapi/restaurants/list/v5"));
    }

    #[test]
    fn test_has_persisted_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"), dir.path().join("headers.json"));
        assert!(!store.has_persisted_session());

        std::fs::write(dir.path().join("session.json"), "[]").unwrap();
        assert!(store.has_persisted_session());
    }

    #[test]
    fn test_read_puppeteer_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"[
              {"name": "_session_tid", "value": "abc", "domain": ".swiggy.com", "path": "/",
               "expires": 1767225600.5, "size": 15, "httpOnly": true, "secure": true,
               "session": false, "sameSite": "Lax"},
              {"name": "userLocation", "value": "%7B%7D", "domain": "www.swiggy.com"}
            ]"#,
        )
        .unwrap();
        let store = SessionStore::new(&path, dir.path().join("headers.json"));

        let cookies = store.read_cookies().unwrap();

        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].http_only);
        assert_eq!(cookies[1].path, "/");
        assert!(!cookies[1].secure);
    }

    #[test]
    fn test_cookie_to_param() {
        let cookie = StoredCookie {
            name: "_session_tid".to_string(),
            value: "abc".to_string(),
            domain: ".swiggy.com".to_string(),
            path: "/".to_string(),
            expires: -1.0,
            http_only: true,
            secure: true,
            same_site: None,
        };

        let param = cookie.to_param().unwrap();

        assert_eq!(param.name, "_session_tid");
        assert_eq!(param.domain.as_deref(), Some(".swiggy.com"));
        assert_eq!(param.secure, Some(true));
        assert!(param.expires.is_none());
        assert!(param.same_site.is_none());
    }

    #[test]
    fn test_cookie_params_keep_expiry_and_same_site() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"[
              {"name": "_session_tid", "value": "abc", "domain": ".swiggy.com", "path": "/",
               "expires": 1767225600.5, "httpOnly": true, "secure": true, "sameSite": "Lax"},
              {"name": "odd", "value": "1", "domain": "www.swiggy.com", "sameSite": "Sideways"}
            ]"#,
        )
        .unwrap();
        let store = SessionStore::new(&path, dir.path().join("headers.json"));

        let params = store.cookie_params().unwrap();

        assert_eq!(params.len(), 2);
        assert!(params[0].expires.is_some());
        assert_eq!(params[0].same_site, Some(CookieSameSite::Lax));
        assert!(params[1].same_site.is_none());
        // ページURLに依存せずドメインだけで設定できること
        assert!(params.iter().all(|p| p.domain.is_some() && p.url.is_none()));
    }

    #[test]
    fn test_same_site_survives_save_and_load() {
        let cookie = StoredCookie {
            name: "a".to_string(),
            value: "b".to_string(),
            domain: ".swiggy.com".to_string(),
            path: "/".to_string(),
            expires: 1767225600.0,
            http_only: false,
            secure: true,
            same_site: Some("Strict".to_string()),
        };

        let json = serde_json::to_string(&[cookie.clone()]).unwrap();
        assert!(json.contains("\"sameSite\":\"Strict\""));
        let loaded: Vec<StoredCookie> = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, vec![cookie]);
    }

    #[tokio::test]
    async fn test_wait_for_session_request_returns_headers() {
        let requests = futures::stream::iter(vec![
            ("https://www.swiggy.com/dapi/restaurants/list".to_string(), "list"),
            ("https://www.swiggy.com/dapi/order/all?order_id=".to_string(), "orders"),
        ]);

        let headers = wait_for_session_request(requests, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(headers, "orders");
    }

    #[tokio::test]
    async fn test_wait_for_session_request_times_out() {
        let requests = futures::stream::pending::<(String, ())>();

        let result = wait_for_session_request(requests, Duration::from_millis(20)).await;

        assert!(matches!(result, Err(ScraperError::Timeout(_))));
    }

    #[tokio::test]
    #[ignore] // 実ブラウザが必要: cargo test test_load_session_on_blank_page_live -- --ignored
    async fn test_load_session_on_blank_page_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"[{"name": "_session_tid", "value": "abc", "domain": ".swiggy.com", "path": "/"}]"#,
        )
        .unwrap();
        let store = SessionStore::new(&path, dir.path().join("headers.json"));
        let config = crate::config::ScraperConfig::new().with_headless(true);
        let mut browser = crate::browser::launch_browser(&config).await.unwrap();
        let page = browser.new_page("about:blank").await.unwrap();

        assert!(store.load_session(&page).await.unwrap());

        browser.close().await.unwrap();
    }
}
