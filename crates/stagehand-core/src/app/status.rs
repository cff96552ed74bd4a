//! Status - 運用向けの状態ビュー
//!
//! ヘルスチェックとデバッグ用の読み取り専用スナップショット。
//! ここの値がライフサイクルの判断に使われることはない。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sweeper::SweepStatus;
use crate::domain::{JobId, JobRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub storage_dir: PathBuf,
    pub storage_dir_exists: bool,
    pub active_jobs: usize,
    /// ストレージ直下のエントリ数（読めなければ `None`）
    pub files_in_dir: Option<usize>,
    pub pending_reclaims: usize,
    pub sweep: SweepStatus,
    pub timestamp: DateTime<Utc>,
}

/// レジストラのテーブル。ジョブ ID 順（ULID なので作成順）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTable {
    pub active_jobs: usize,
    pub jobs: BTreeMap<JobId, JobRecord>,
}

impl FromIterator<(JobId, JobRecord)> for JobTable {
    fn from_iter<I: IntoIterator<Item = (JobId, JobRecord)>>(iter: I) -> Self {
        let jobs: BTreeMap<_, _> = iter.into_iter().collect();
        Self {
            active_jobs: jobs.len(),
            jobs,
        }
    }
}

pub(crate) async fn count_entries(dir: &Path) -> Option<usize> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut count = 0;
    while let Ok(Some(_)) = entries.next_entry().await {
        count += 1;
    }
    Some(count)
}
