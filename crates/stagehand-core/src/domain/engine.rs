//! Engine payloads - 合成エンジンに送るもの、返ってくるもの
//!
//! エンジンの中身は不透明として扱う。`EngineStatus` は生の `data` を保持し、
//! CLI がポーリングで見るフィールドにだけ読み取りヘルパーを用意する。

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// `data.status` に入るエンジン側の状態コード
const STATUS_RUNNING: i64 = 1;
const STATUS_FINISHED: i64 = 2;
const STATUS_FAILED: i64 = 3;

/// エンジンに渡すジョブ 1 件（パスはエンジン側から見たもの）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSubmission {
    pub job_id: JobId,
    pub audio_path: String,
    pub video_path: String,
}

/// ジョブコードに対してエンジンが返すステータス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub code: Option<i64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EngineStatus {
    fn status_code(&self) -> Option<i64> {
        self.data.get("status").and_then(serde_json::Value::as_i64)
    }

    pub fn is_running(&self) -> bool {
        self.status_code() == Some(STATUS_RUNNING)
    }

    pub fn is_finished(&self) -> bool {
        self.status_code() == Some(STATUS_FINISHED)
    }

    pub fn is_failed(&self) -> bool {
        self.status_code() == Some(STATUS_FAILED)
    }

    pub fn progress(&self) -> Option<u64> {
        self.data.get("progress").and_then(serde_json::Value::as_u64)
    }

    pub fn message(&self) -> Option<&str> {
        self.data.get("msg").and_then(serde_json::Value::as_str)
    }

    /// 生成物の `temp` 内でのファイル名
    ///
    /// エンジンはパス（`/temp/x-r.mp4` など）を返すが、使うのは最後の要素だけ。
    pub fn result_filename(&self) -> Option<String> {
        let raw = self.data.get("result").and_then(serde_json::Value::as_str)?;
        Path::new(raw)
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
    }
}
