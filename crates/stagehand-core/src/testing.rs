//! テスト用の port 実装（fake）

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use url::Url;

use crate::domain::{EngineError, EngineStatus, EngineSubmission, JobId, StagingError};
use crate::ports::{Downloader, FixedClock, SynthesisEngine};

pub fn fixed_clock() -> FixedClock {
    FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
}

/// URL ごとの fake downloader の振る舞い
#[derive(Clone)]
pub enum Transfer {
    Body(Vec<u8>),
    /// 書き込んだ後、接続が切れたかのように失敗する
    Partial(Vec<u8>),
    Status(u16),
}

/// URL ごとに用意した転送を返す（未登録の URL は 404）
#[derive(Default)]
pub struct FakeDownloader {
    transfers: HashMap<String, Transfer>,
}

impl FakeDownloader {
    pub fn with(mut self, url: &str, transfer: Transfer) -> Self {
        self.transfers.insert(url.to_string(), transfer);
        self
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, StagingError> {
        let write_err = |source| StagingError::Write {
            path: dest.to_path_buf(),
            source,
        };
        match self.transfers.get(url.as_str()) {
            Some(Transfer::Body(bytes)) => {
                tokio::fs::write(dest, bytes).await.map_err(write_err)?;
                Ok(bytes.len() as u64)
            }
            Some(Transfer::Partial(bytes)) => {
                tokio::fs::write(dest, bytes).await.map_err(write_err)?;
                Err(StagingError::Request {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                })
            }
            Some(Transfer::Status(status)) => Err(StagingError::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(StagingError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// 投入を記録し、query には固定のステータスを返すエンジン
pub struct FakeEngine {
    accept: bool,
    pub submissions: Mutex<Vec<EngineSubmission>>,
    pub queries: AtomicUsize,
    status: serde_json::Value,
}

impl FakeEngine {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            submissions: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            status: json!({ "status": 2, "progress": 100, "result": "/temp/out-r.mp4" }),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            ..Self::accepting()
        }
    }

    pub fn submitted(&self) -> Vec<EngineSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisEngine for FakeEngine {
    async fn submit(&self, submission: &EngineSubmission) -> Result<(), EngineError> {
        self.submissions.lock().unwrap().push(submission.clone());
        if self.accept {
            Ok(())
        } else {
            Err(EngineError::Rejected(json!({ "code": 10002 })))
        }
    }

    async fn query(&self, job_id: &JobId) -> Result<EngineStatus, EngineError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut data = self.status.clone();
        data["code"] = json!(job_id.to_string());
        Ok(EngineStatus {
            code: Some(10000),
            data,
        })
    }
}
