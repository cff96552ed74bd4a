//! Errors - 呼び出し側に返す失敗と、ベストエフォートの後始末の失敗
//!
//! # 分類
//! - `RelayError`: サービスの入口から呼び出し側に返る
//! - `StagingError` / `EngineError`: `RelayError` が包む原因
//! - `ReclaimError`: 実行できなかった削除。伝播させない。
//!   呼び出し側は `ReclaimError::report()` でログに残して先に進む。
//!   残ったファイルは次の sweep が再試行する。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("engine submission failed: {0}")]
    EngineSubmit(#[source] EngineError),

    #[error("engine query failed: {0}")]
    EngineQuery(#[source] EngineError),

    #[error("result file does not exist: {0}")]
    ResultMissing(String),

    #[error("invalid result file name '{0}'")]
    InvalidResultName(String),

    #[error("cannot list storage directory {path}: {source}")]
    Sweep {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// リモートリソースをストレージに取り込めなかった
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("download of {url} timed out")]
    Timeout { url: String },

    #[error("download of {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 合成エンジンに到達できない、またはリクエストを拒否された
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    #[error("engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("engine rejected job: {0}")]
    Rejected(serde_json::Value),

    #[error("cannot decode engine response: {0}")]
    Decode(String),
}

/// ベストエフォートの削除の失敗
#[derive(Debug, Error)]
#[error("cannot delete {path}: {source}")]
pub struct ReclaimError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl ReclaimError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    /// ログに残して捨てる。`ReclaimError` の出口はここだけ。
    pub fn report(self) {
        tracing::warn!(
            path = %self.path.display(),
            error = %self.source,
            "file deletion failed, leaving it for the next sweep"
        );
    }
}

/// ファイルを 1 つ削除する（既に無ければ `Ok(false)`）
pub async fn remove_file_quietly(path: &std::path::Path) -> Result<bool, ReclaimError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ReclaimError::new(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_error_messages_carry_cause() {
        let err = RelayError::from(StagingError::Status {
            url: "http://x/a.mp3".to_string(),
            status: 404,
        });
        assert_eq!(
            err.to_string(),
            "staging failed: download of http://x/a.mp3 returned HTTP 404"
        );

        let err = RelayError::EngineSubmit(EngineError::Rejected(serde_json::json!({"code": 1})));
        assert!(err.to_string().contains("rejected"));
    }

    #[tokio::test]
    async fn removing_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let removed = remove_file_quietly(&dir.path().join("nope.mp4")).await.unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn removing_existing_file_reports_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"x").unwrap();

        assert!(remove_file_quietly(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn removing_a_directory_is_a_reclaim_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = remove_file_quietly(dir.path()).await.unwrap_err();
        assert_eq!(err.path, dir.path());
    }
}
