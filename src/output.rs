//! 出力先（スクリーンショットディレクトリ・CSV）

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ScraperError;
use crate::orders::OutputRecord;
use crate::traits::RecordSink;

/// 実行ごとにスクリーンショットディレクトリを空にし、CSVを削除する
pub fn prepare_outputs(screenshot_dir: &Path, csv_path: &Path) -> Result<(), ScraperError> {
    if screenshot_dir.exists() {
        std::fs::remove_dir_all(screenshot_dir)?;
    }
    std::fs::create_dir_all(screenshot_dir)?;

    if csv_path.exists() {
        std::fs::remove_file(csv_path)?;
    }
    info!(
        "Prepared outputs: screenshots={:?}, csv={:?}",
        screenshot_dir, csv_path
    );
    Ok(())
}

/// 1行ごとにフラッシュするCSV追記先
///
/// ファイルは最初の行を書くときに作成され、ヘッダ行もそのとき書かれる。
pub struct CsvSink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    rows: usize,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &OutputRecord) -> Result<(), ScraperError> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => csv::Writer::from_path(&self.path)?,
        };
        let writer = self.writer.insert(writer);
        writer.serialize(record)?;
        writer.flush()?;
        self.rows += 1;
        Ok(())
    }
}
