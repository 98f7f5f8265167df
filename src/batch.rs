//! # Batch モジュール
//!
//! 記録ファイルを探索し、1ファイル1タスクで並列に処理します。
//!
//! 各タスクは tokio の `spawn_blocking` 上で独立に実行され、失敗（エラー・パニック）は
//! そのファイルだけに閉じ込められます。パニックしたタスクも `Err` としてファイルに
//! 紐付けて返します。結果はシナリオID・パス順に並べ替えて返すため、
//! 後段の連結順序は実行順に依存しません。

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::{Id, JoinSet};
use tracing::{debug, error};

use crate::io::IoError;

/// 1つの記録ファイル
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordingFile {
    /// 記録が置かれたディレクトリ名
    pub scenario_id: String,
    pub path: PathBuf,
}

impl RecordingFile {
    pub fn new(path: PathBuf) -> Self {
        let scenario_id = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string());
        Self { scenario_id, path }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// 入力パス以下のCSVファイルを列挙する（ファイルが指定された場合はそれのみ）
pub fn discover_recordings(input: &Path) -> Result<Vec<RecordingFile>, IoError> {
    if input.is_file() {
        return Ok(vec![RecordingFile::new(input.to_path_buf())]);
    }

    let mut files = Vec::new();
    let mut pending = vec![input.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| IoError::Io(dir.clone(), e))?;
        for entry in entries {
            let path = entry.map_err(|e| IoError::Io(dir.clone(), e))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_csv(&path) {
                files.push(RecordingFile::new(path));
            }
        }
    }
    files.sort();
    Ok(files)
}

/// 全ファイルを並列に処理する
///
/// 失敗したファイルは結果に `Err(理由)` として残り、他のファイルの処理は継続します。
pub async fn process_all<T, E, F>(files: Vec<RecordingFile>, task: F) -> Vec<(RecordingFile, Result<T, String>)>
where
    T: Send + 'static,
    E: fmt::Display,
    F: Fn(&RecordingFile) -> Result<T, E> + Send + Sync + 'static,
{
    let task = Arc::new(task);
    let mut set = JoinSet::new();
    let mut pending: HashMap<Id, RecordingFile> = HashMap::new();
    for file in files {
        let task = Arc::clone(&task);
        let owned = file.clone();
        let handle = set.spawn_blocking(move || {
            debug!("処理開始: {}", owned.path.display());
            task(&owned).map_err(|e| e.to_string())
        });
        pending.insert(handle.id(), file);
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((id, result)) => {
                if let Some(file) = pending.remove(&id) {
                    results.push((file, result));
                }
            }
            Err(err) => {
                let Some(file) = pending.remove(&err.id()) else {
                    error!("タスクが異常終了しました: {}", err);
                    continue;
                };
                error!("{} の処理が異常終了しました: {}", file.path.display(), err);
                let reason = if err.is_panic() {
                    format!("panicked: {}", err)
                } else {
                    format!("cancelled: {}", err)
                };
                results.push((file, Err(reason)));
            }
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}
