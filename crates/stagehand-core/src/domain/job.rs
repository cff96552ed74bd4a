//! JobRecord - ジョブ 1 件が所有するファイルとライフサイクルのタイムスタンプ

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 投入済みジョブ 1 件のメタデータ
///
/// 設計:
/// - レコードが存在するのはレジストラのテーブルだけ
/// - `input_files` はステージ順（音声 → 動画）
/// - 状態遷移はフィールド直書きではなくメソッド経由
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub input_files: Vec<PathBuf>,
    pub result_file: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub result_retrieved_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(input_files: Vec<PathBuf>, created_at: DateTime<Utc>) -> Self {
        Self {
            input_files,
            result_file: None,
            created_at,
            result_retrieved_at: None,
        }
    }

    /// 生成物を渡したことを記録
    pub fn attach_result(&mut self, result_file: PathBuf, retrieved_at: DateTime<Utc>) {
        self.result_file = Some(result_file);
        self.result_retrieved_at = Some(retrieved_at);
    }

    /// このレコードが保持する全パス（入力、あれば結果）
    pub fn owned_files(&self) -> impl Iterator<Item = &Path> {
        self.input_files
            .iter()
            .map(PathBuf::as_path)
            .chain(self.result_file.as_deref())
    }

    /// `now` 時点で `max_age` を超えているか
    pub fn is_older_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > max_age
    }
}
