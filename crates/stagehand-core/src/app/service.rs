//! RelayService - トランスポート層から呼ばれる入口
//!
//! # submit のフロー
//! 1. 音声をステージ → 動画をステージ
//! 2. レジストラに登録（エンジンがジョブ ID を必要とするため投入より先）
//! 3. エンジンに投入
//! 4. どこで失敗しても、ディスクに置いたファイルは返る前に削除する
//!
//! # query
//! エンジンへの素通し。未知のジョブでも転送する。
//!
//! # fetch のフロー
//! 1. 結果ファイルを読む
//! 2. レジストラに結果を紐付ける
//! 3. 結果と入力の削除を `reclaim_delay` 後に予約
//! 4. レコード自体の削除をさらに `record_removal_margin` 後に予約

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::reclaimer::DeferredReclaimer;
use super::registrar::JobRegistrar;
use super::stager::FileStager;
use super::status::{JobTable, ServiceStatus, count_entries};
use super::sweeper::SweepScheduler;
use crate::config::Config;
use crate::domain::{EngineStatus, EngineSubmission, JobId, MediaKind, RelayError};
use crate::ports::SynthesisEngine;

/// 生成物のバイト列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPayload {
    pub data: Vec<u8>,
    pub size: usize,
}

pub struct RelayService {
    config: Config,
    stager: FileStager,
    registrar: Arc<JobRegistrar>,
    reclaimer: Arc<DeferredReclaimer>,
    sweeper: Arc<SweepScheduler>,
    engine: Arc<dyn SynthesisEngine>,
}

/// `RelayService::start` が起動したバックグラウンドワーカーのハンドル
pub struct Workers {
    reclaim: JoinHandle<()>,
    sweep: JoinHandle<()>,
    reclaimer: Arc<DeferredReclaimer>,
}

impl Workers {
    /// 両ループを止めてから、積まれたままの削除を実行する
    pub async fn shutdown_and_join(self) {
        self.sweep.abort();
        self.reclaim.abort();
        let _ = self.sweep.await;
        let _ = self.reclaim.await;

        let flushed = self.reclaimer.flush().await;
        if flushed > 0 {
            tracing::info!(flushed, "ran pending reclaims at shutdown");
        }
    }
}

impl RelayService {
    pub(crate) fn new(
        config: Config,
        stager: FileStager,
        registrar: Arc<JobRegistrar>,
        reclaimer: Arc<DeferredReclaimer>,
        sweeper: Arc<SweepScheduler>,
        engine: Arc<dyn SynthesisEngine>,
    ) -> Self {
        Self {
            config,
            stager,
            registrar,
            reclaimer,
            sweeper,
            engine,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registrar(&self) -> &Arc<JobRegistrar> {
        &self.registrar
    }

    pub fn reclaimer(&self) -> &Arc<DeferredReclaimer> {
        &self.reclaimer
    }

    pub fn sweeper(&self) -> &Arc<SweepScheduler> {
        &self.sweeper
    }

    /// 遅延削除ワーカーと sweep ループを起動
    pub fn start(&self) -> Workers {
        Workers {
            reclaim: self.reclaimer.spawn(),
            sweep: self.sweeper.spawn(),
            reclaimer: self.reclaimer.clone(),
        }
    }

    pub async fn submit_job(&self, audio_url: &str, video_url: &str) -> Result<JobId, RelayError> {
        let audio = self.stager.stage(audio_url, MediaKind::Audio).await?;
        let video = match self.stager.stage(video_url, MediaKind::Video).await {
            Ok(video) => video,
            Err(err) => {
                self.discard(vec![audio.local_path]).await;
                return Err(err.into());
            }
        };

        let job_id = self
            .registrar
            .create_job(audio.local_path.clone(), video.local_path.clone())
            .await;

        let submission = EngineSubmission {
            job_id,
            audio_path: audio.engine_path,
            video_path: video.engine_path,
        };
        if let Err(err) = self.engine.submit(&submission).await {
            tracing::error!(%job_id, error = %err, "engine did not accept job");
            self.registrar.remove_job(&job_id).await;
            self.discard(vec![audio.local_path, video.local_path]).await;
            return Err(RelayError::EngineSubmit(err));
        }

        tracing::info!(%job_id, "job submitted");
        Ok(job_id)
    }

    pub async fn query_job(&self, job_id: &JobId) -> Result<EngineStatus, RelayError> {
        if self.registrar.get(job_id).await.is_none() {
            tracing::debug!(%job_id, "querying a job this process does not track");
        }
        let status = self
            .engine
            .query(job_id)
            .await
            .map_err(RelayError::EngineQuery)?;
        tracing::debug!(%job_id, code = ?status.code, data = %status.data, "engine status");
        Ok(status)
    }

    /// 生成物を渡し、ジョブの後始末を予約する
    ///
    /// `job_id` がなければ結果ファイルだけを回収し、入力は定期 sweep に任せる。
    pub async fn fetch_result(
        &self,
        result_filename: &str,
        job_id: Option<&JobId>,
    ) -> Result<ResultPayload, RelayError> {
        let path = self.result_path(result_filename)?;
        tracing::info!(path = %path.display(), "fetching result");

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::ResultMissing(result_filename.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = data.len();
        tracing::info!(path = %path.display(), size, "result read");

        let mut files = vec![path.clone()];
        if let Some(job_id) = job_id {
            match self.registrar.attach_result(job_id, path).await {
                Some(inputs) => files.extend(inputs),
                None => tracing::warn!(%job_id, "no file mapping for job, reclaiming the result only"),
            }
        }

        self.reclaimer.schedule(files, self.config.reclaim_delay).await;
        if let Some(job_id) = job_id {
            self.reclaimer
                .schedule_job_removal(*job_id, self.config.record_removal_delay())
                .await;
        }

        Ok(ResultPayload { data, size })
    }

    pub async fn status(&self) -> ServiceStatus {
        let storage_dir = self.config.storage_dir.clone();
        ServiceStatus {
            storage_dir_exists: tokio::fs::try_exists(&storage_dir).await.unwrap_or(false),
            files_in_dir: count_entries(&storage_dir).await,
            storage_dir,
            active_jobs: self.registrar.len().await,
            pending_reclaims: self.reclaimer.pending().await,
            sweep: self.sweeper.status(),
            timestamp: Utc::now(),
        }
    }

    pub async fn job_table(&self) -> JobTable {
        self.registrar.snapshot().await.into_iter().collect()
    }

    /// 結果ファイルは結果ディレクトリ内の素のファイル名で指定する
    fn result_path(&self, result_filename: &str) -> Result<PathBuf, RelayError> {
        let mut components = Path::new(result_filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == result_filename => {
                Ok(self.config.results_dir().join(name))
            }
            _ => Err(RelayError::InvalidResultName(result_filename.to_string())),
        }
    }

    async fn discard(&self, paths: Vec<PathBuf>) {
        self.reclaimer.schedule(paths, Duration::ZERO).await;
    }
}
