//! JobRegistrar - ジョブ ID → 所有ファイルの対応表
//!
//! 各ジョブがどのファイルを、いつから所有しているかを管理します。
//! ここが「消してはいけないファイル」の唯一の情報源で、
//! sweep も遅延削除もこのテーブルを基準に判断します。
//!
//! # ロック方針
//! - テーブル全体を 1 つの Mutex で守る（読み取りも書き込みも必ず取る）
//! - クリティカルセクション内ではメモリしか触らない
//! - ファイル I/O・ネットワーク I/O は呼び出し側がロックの外で行う
//!
//! # ライフサイクル
//! 1. `create_job`: ステージ済みの入力 2 つを登録
//! 2. `attach_result`: 結果を渡した時点で結果ファイルを紐付け
//! 3. `remove_job`: 遅延削除の後、またはエンジン投入失敗時に削除
//! 4. `expire_older_than`: `max_age` を超えたレコードを sweep が失効させる

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::domain::{JobId, JobRecord};
use crate::ports::{Clock, IdGenerator};

pub struct JobRegistrar {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl JobRegistrar {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            clock,
            ids,
        }
    }

    /// ステージ済みの入力 2 つを所有するジョブを登録し、新しい ID を返す
    pub async fn create_job(&self, audio_path: PathBuf, video_path: PathBuf) -> JobId {
        let record = JobRecord::new(vec![audio_path, video_path], self.clock.now());
        let mut jobs = self.jobs.lock().await;
        let mut job_id = self.ids.generate_job_id();
        while jobs.contains_key(&job_id) {
            job_id = self.ids.generate_job_id();
        }
        jobs.insert(job_id, record);
        job_id
    }

    /// レコードを削除する（存在しない ID は無視）
    pub async fn remove_job(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.lock().await.remove(job_id)
    }

    /// 結果を渡したことを記録する
    ///
    /// 入力パスのコピーを返す。未知のジョブなら `None`。
    pub async fn attach_result(&self, job_id: &JobId, result_path: PathBuf) -> Option<Vec<PathBuf>> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().await;
        let record = jobs.get_mut(job_id)?;
        record.attach_result(result_path, now);
        Some(record.input_files.clone())
    }

    /// 現在のレコードが保持している全ファイルの和集合
    pub async fn active_file_set(&self) -> HashSet<PathBuf> {
        let jobs = self.jobs.lock().await;
        jobs.values()
            .flat_map(JobRecord::owned_files)
            .map(PathBuf::from)
            .collect()
    }

    /// 作成から `max_age` を超えたレコードをすべて削除し、件数を返す
    ///
    /// ファイル自体は消さない。active でなくなったファイルは次の sweep が拾う。
    pub async fn expire_older_than(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|job_id, record| {
            let expired = record.is_older_than(max_age, now);
            if expired {
                tracing::info!(%job_id, created_at = %record.created_at, "expiring job record");
            }
            !expired
        });
        before - jobs.len()
    }

    pub async fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// テーブル全体のコピー（運用時の可視化用）
    pub async fn snapshot(&self) -> HashMap<JobId, JobRecord> {
        self.jobs.lock().await.clone()
    }
}
