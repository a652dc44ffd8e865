use std::path::PathBuf;
use std::time::Duration;

use crate::orders::Region;

const ORDERS_URL: &str = "https://www.swiggy.com/my-account/orders";
const ORDERS_API_PATTERN: &str = "dapi/order/all";

/// 各待機の上限時間
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    /// 最下部スクロール後
    pub scroll_settle: Duration,
    /// 「さらに表示」クリック後、APIレスポンス待ち
    pub load_more_settle: Duration,
    /// 詳細パネルの表示待ち
    pub panel_open_timeout: Duration,
    /// 詳細パネルの描画待ち
    pub panel_settle: Duration,
    /// 詳細パネルが閉じるまで
    pub panel_close_timeout: Duration,
    /// キャリブレーション前
    pub calibration_settle: Duration,
    pub poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            scroll_settle: Duration::from_millis(1500),
            load_more_settle: Duration::from_millis(3000),
            panel_open_timeout: Duration::from_millis(8000),
            panel_settle: Duration::from_millis(1500),
            panel_close_timeout: Duration::from_millis(3000),
            calibration_settle: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Timings {
    /// 待機なし（テスト用）
    pub fn immediate() -> Self {
        Self {
            scroll_settle: Duration::ZERO,
            load_more_settle: Duration::ZERO,
            panel_open_timeout: Duration::ZERO,
            panel_settle: Duration::ZERO,
            panel_close_timeout: Duration::ZERO,
            calibration_settle: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// レシート切り抜き領域の決め方
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationMode {
    /// ビューポート右下付近の要素を調べる
    CornerProbe { inset: f64, fallback_width: f64 },
    /// 固定領域
    Fixed(Region),
}

impl Default for CalibrationMode {
    fn default() -> Self {
        Self::CornerProbe {
            inset: 50.0,
            fallback_width: 500.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub orders_url: String,
    pub orders_api_pattern: String,
    pub panel_selector: String,
    pub overlay_selector: String,
    pub load_more_text: String,
    pub screenshot_dir: PathBuf,
    pub csv_path: PathBuf,
    pub session_file: PathBuf,
    pub headers_file: PathBuf,
    pub headless: bool,
    pub debug: bool,
    pub window_size: (u32, u32),
    pub chrome_executable: Option<PathBuf>,
    pub session_capture_timeout: Duration,
    pub timings: Timings,
    pub calibration: CalibrationMode,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            orders_url: ORDERS_URL.to_string(),
            orders_api_pattern: ORDERS_API_PATTERN.to_string(),
            panel_selector: "#overlay-sidebar-root".to_string(),
            overlay_selector: "#overlay".to_string(),
            load_more_text: "Show More Orders".to_string(),
            screenshot_dir: PathBuf::from("screenshots"),
            csv_path: PathBuf::from("orders.csv"),
            session_file: PathBuf::from("session.json"),
            headers_file: PathBuf::from("headers.json"),
            headless: false,
            debug: false,
            window_size: (1440, 900),
            chrome_executable: std::env::var("CHROME_PATH")
                .or_else(|_| std::env::var("CHROMIUM_PATH"))
                .ok()
                .map(PathBuf::from),
            session_capture_timeout: Duration::from_secs(300),
            timings: Timings::default(),
            calibration: CalibrationMode::default(),
        }
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screenshot_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = path.into();
        self
    }

    pub fn with_csv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_path = path.into();
        self
    }

    pub fn with_session_files(
        mut self,
        session_file: impl Into<PathBuf>,
        headers_file: impl Into<PathBuf>,
    ) -> Self {
        self.session_file = session_file.into();
        self.headers_file = headers_file.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationMode) -> Self {
        self.calibration = calibration;
        self
    }
}
