//! DeferredReclaimer - ファイルとジョブレコードの遅延削除
//!
//! 遅延作業はすべて発火時刻順の min-heap に積まれ、1 本のワーカータスク（`run`）
//! が実行します。fetch がどれだけ来てもバックグラウンドの並行数は 1 のまま。
//!
//! # フロー
//! 1. `schedule` / `schedule_job_removal` がエントリを積み、ワーカーを起こす
//! 2. ワーカーは発火時刻を過ぎたエントリをすべて取り出し、ロックを離してから実行
//! 3. 次の発火時刻か、次の push まで眠る
//!
//! # 停止時
//! `flush()` で未実行のエントリを即時実行する（プロセスと一緒に失わない）

use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::registrar::JobRegistrar;
use crate::domain::JobId;
use crate::domain::errors::remove_file_quietly;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReclaimAction {
    DeleteFiles(Vec<PathBuf>),
    RemoveJob(JobId),
}

/// heap のエントリ。`seq` で同時刻のエントリを FIFO に保つ
#[derive(Debug, Clone, PartialEq, Eq)]
struct Scheduled {
    fire_at: Instant,
    seq: u64,
    action: ReclaimAction,
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // 逆順: 早い時刻ほど優先度が高い
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct ReclaimQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl ReclaimQueue {
    fn push(&mut self, fire_at: Instant, action: ReclaimAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled {
            fire_at,
            seq,
            action,
        });
    }

    fn pop_due(&mut self, now: Instant) -> Vec<ReclaimAction> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.fire_at > now {
                break; // heap は整列済みなのでここで打ち切り
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry.action);
            }
        }
        due
    }

    fn drain(&mut self) -> Vec<ReclaimAction> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            all.push(entry.action);
        }
        all
    }
}

pub struct DeferredReclaimer {
    queue: Mutex<ReclaimQueue>,
    notify: Notify,
    registrar: Arc<JobRegistrar>,
}

impl DeferredReclaimer {
    pub fn new(registrar: Arc<JobRegistrar>) -> Self {
        Self {
            queue: Mutex::new(ReclaimQueue::default()),
            notify: Notify::new(),
            registrar,
        }
    }

    /// `delay` 後に `paths` を削除する
    ///
    /// `delay` が 0 なら呼び出し側のタスクで即時削除。それ以外は積むだけで返る。
    pub async fn schedule(&self, paths: Vec<PathBuf>, delay: Duration) {
        if paths.is_empty() {
            return;
        }
        if delay.is_zero() {
            delete_files(&paths).await;
            return;
        }
        tracing::debug!(files = paths.len(), delay_secs = delay.as_secs(), "deletion scheduled");
        self.enqueue(delay, ReclaimAction::DeleteFiles(paths)).await;
    }

    /// `delay` 後にジョブレコードを削除する
    pub async fn schedule_job_removal(&self, job_id: JobId, delay: Duration) {
        if delay.is_zero() {
            self.registrar.remove_job(&job_id).await;
            return;
        }
        self.enqueue(delay, ReclaimAction::RemoveJob(job_id)).await;
    }

    /// 未実行のエントリ数
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.heap.len()
    }

    /// 発火時刻に関係なく、未実行のエントリをすべて今実行する
    pub async fn flush(&self) -> usize {
        let actions = self.queue.lock().await.drain();
        let count = actions.len();
        for action in actions {
            self.execute(action).await;
        }
        count
    }

    /// 現在のランタイム上にワーカーを起動
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// ワーカーループ（戻らない）
    pub async fn run(&self) {
        loop {
            let (due, next_wake) = {
                let mut queue = self.queue.lock().await;
                let due = queue.pop_due(Instant::now());
                (due, queue.heap.peek().map(|entry| entry.fire_at))
            }; // ここでロック解放

            for action in due {
                self.execute(action).await;
            }

            // 新しいエントリ、または次の発火時刻まで待つ
            if let Some(wake_time) = next_wake {
                tokio::select! {
                    _ = self.notify.notified() => {},
                    _ = tokio::time::sleep_until(wake_time) => {},
                }
            } else {
                self.notify.notified().await;
            }
        }
    }

    async fn enqueue(&self, delay: Duration, action: ReclaimAction) {
        {
            let mut queue = self.queue.lock().await;
            queue.push(Instant::now() + delay, action);
        }
        // ロックの外で通知
        self.notify.notify_one();
    }

    async fn execute(&self, action: ReclaimAction) {
        match action {
            ReclaimAction::DeleteFiles(paths) => {
                let removed = delete_files(&paths).await;
                tracing::debug!(removed, requested = paths.len(), "deferred deletion ran");
            }
            ReclaimAction::RemoveJob(job_id) => {
                if self.registrar.remove_job(&job_id).await.is_some() {
                    tracing::debug!(%job_id, "job record removed");
                }
            }
        }
    }
}

/// ベストエフォートで全パスを削除し、実際に消えた件数を返す
pub async fn delete_files(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match remove_file_quietly(path).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => err.report(),
        }
    }
    removed
}
