//! SweepScheduler - ストレージの定期回収ループ
//!
//! レジストラが追跡していないファイル（orphan）と、寿命を超えたジョブのファイル
//! （stale）を定期的に削除します。遅延削除（DeferredReclaimer）が取りこぼした
//! ものを拾うための安全網です。
//!
//! # 1 パスのフロー
//! 1. レジストラから active file set のスナップショットを取る
//! 2. ストレージ直下と `temp`（結果ディレクトリ）の通常ファイルを列挙
//! 3. active でない直下のファイル: `grace` を超えていれば削除（orphan）
//! 4. active でない `temp` のファイル: `max_age` を超えたときだけ削除（orphan）
//! 5. active なファイル: `max_age` を超えていれば削除（stale）
//! 6. `max_age` を超えたジョブレコードを失効させる
//!
//! # `temp` の扱い
//! 結果ファイルはクライアントが fetch するまでどのレコードにも紐付かない。
//! 直下と同じ `grace` を当てると、未取得の結果を消してしまうので、
//! `temp` には `max_age` のバックストップだけを適用する。
//!
//! # 状態遷移
//! Idle → Sweeping → Idle を永久に繰り返す。失敗したパスはログに残し、
//! `interval` ではなく `error_backoff` 後に再試行する（ループ自体は止まらない）。

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registrar::JobRegistrar;
use crate::config::Config;
use crate::domain::RelayError;
use crate::domain::errors::remove_file_quietly;
use crate::ports::Clock;

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    pub interval: Duration,
    pub error_backoff: Duration,
    pub grace: Duration,
    pub max_age: Duration,
}

impl From<&Config> for SweepPolicy {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.sweep_interval,
            error_backoff: config.sweep_error_backoff,
            grace: config.grace,
            max_age: config.max_age,
        }
    }
}

/// 1 パスの集計（実際に削除できた件数のみ）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub orphan_files: usize,
    pub stale_files: usize,
    pub expired_jobs: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.orphan_files + self.stale_files + self.expired_jobs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepState {
    Idle,
    Sweeping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepStatus {
    pub state: SweepState,
    pub passes: u64,
    pub failed_passes: u64,
    pub last_report: Option<SweepReport>,
}

impl Default for SweepStatus {
    fn default() -> Self {
        Self {
            state: SweepState::Idle,
            passes: 0,
            failed_passes: 0,
            last_report: None,
        }
    }
}

/// 列挙されたファイル 1 件
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    modified: DateTime<Utc>,
    /// `temp` 配下（エンジンの出力）かどうか
    is_result: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Orphan,
    Stale,
}

pub struct SweepScheduler {
    storage_dir: PathBuf,
    registrar: Arc<JobRegistrar>,
    clock: Arc<dyn Clock>,
    policy: SweepPolicy,
    status: watch::Sender<SweepStatus>,
}

impl SweepScheduler {
    pub fn new(
        storage_dir: PathBuf,
        registrar: Arc<JobRegistrar>,
        clock: Arc<dyn Clock>,
        policy: SweepPolicy,
    ) -> Self {
        let (status, _) = watch::channel(SweepStatus::default());
        Self {
            storage_dir,
            registrar,
            clock,
            policy,
            status,
        }
    }

    pub fn status(&self) -> SweepStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SweepStatus> {
        self.status.subscribe()
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// 永久ループ。失敗したパスでもループは終了しない。
    pub async fn run(&self) {
        tracing::info!(
            dir = %self.storage_dir.display(),
            interval_secs = self.policy.interval.as_secs(),
            "periodic sweep started"
        );
        loop {
            let wait = match self.sweep_once().await {
                Ok(_) => self.policy.interval,
                Err(err) => {
                    tracing::error!(error = %err, "sweep pass failed");
                    self.policy.error_backoff
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// ストレージを 1 回走査する
    ///
    /// 状態は watch チャネルで公開され、`status()` / `subscribe()` から参照できる。
    pub async fn sweep_once(&self) -> Result<SweepReport, RelayError> {
        self.status.send_modify(|s| s.state = SweepState::Sweeping);
        let result = self.pass().await;
        self.status.send_modify(|s| {
            s.state = SweepState::Idle;
            s.passes += 1;
            match &result {
                Ok(report) => s.last_report = Some(*report),
                Err(_) => s.failed_passes += 1,
            }
        });
        result
    }

    async fn pass(&self) -> Result<SweepReport, RelayError> {
        let active = self.registrar.active_file_set().await;
        let files = self.list_files().await?;
        let now = self.clock.now();

        let mut report = SweepReport::default();
        for candidate in files {
            let verdict = self.classify(&candidate, now, &active);
            if verdict == Verdict::Keep {
                continue;
            }
            let path = candidate.path;
            match remove_file_quietly(&path).await {
                Ok(true) => match verdict {
                    Verdict::Orphan => report.orphan_files += 1,
                    Verdict::Stale => {
                        tracing::warn!(path = %path.display(), "deleting file of a job past max age");
                        report.stale_files += 1;
                    }
                    Verdict::Keep => {}
                },
                Ok(false) => {}
                Err(err) => err.report(),
            }
        }

        report.expired_jobs = self.registrar.expire_older_than(self.policy.max_age).await;

        if report.total() > 0 {
            tracing::info!(
                orphan_files = report.orphan_files,
                stale_files = report.stale_files,
                expired_jobs = report.expired_jobs,
                "periodic sweep reclaimed {} items",
                report.total()
            );
        }
        Ok(report)
    }

    fn classify(
        &self,
        candidate: &Candidate,
        now: DateTime<Utc>,
        active: &HashSet<PathBuf>,
    ) -> Verdict {
        // 未来の mtime は age 0 として扱う
        let age = (now - candidate.modified).to_std().unwrap_or(Duration::ZERO);
        if active.contains(&candidate.path) {
            return if age > self.policy.max_age {
                Verdict::Stale
            } else {
                Verdict::Keep
            };
        }
        // 未取得の結果はまだレコードに紐付いていない
        let threshold = if candidate.is_result {
            self.policy.max_age
        } else {
            self.policy.grace
        };
        if age > threshold {
            Verdict::Orphan
        } else {
            Verdict::Keep
        }
    }

    /// ストレージ直下と `temp` 配下の通常ファイル（再帰はしない）
    async fn list_files(&self) -> Result<Vec<Candidate>, RelayError> {
        let mut files = list_dir(&self.storage_dir, false)
            .await
            .map_err(|source| RelayError::Sweep {
                path: self.storage_dir.clone(),
                source,
            })?;

        let results_dir = self.storage_dir.join(crate::RESULTS_SUBDIR);
        match list_dir(&results_dir, true).await {
            Ok(results) => files.extend(results),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %results_dir.display(), error = %e, "cannot list results dir");
            }
        }
        Ok(files)
    }
}

async fn list_dir(dir: &Path, is_result: bool) -> io::Result<Vec<Candidate>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                // 列挙中に消えた、またはリンク切れ
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        match metadata.modified() {
            Ok(modified) => files.push(Candidate {
                path,
                modified: DateTime::<Utc>::from(modified),
                is_result,
            }),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "no mtime, skipping"),
        }
    }
    Ok(files)
}
