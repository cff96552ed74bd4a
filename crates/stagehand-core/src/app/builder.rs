//! ServiceBuilder - ライフサイクル部品のワイヤリング
//!
//! # Fail-fast
//! - `build()` で設定を検証し、ストレージと結果ディレクトリを作成してから
//!   サービスを返す（起動後に設定ミスで落ちることはない）
//! - 未指定の port には本番用アダプタ（HTTP / SystemClock / ULID）を使う
//!
//! # 例
//! ```ignore
//! let service = ServiceBuilder::new(Config::default()).build()?;
//! let workers = service.start();
//! ```

use std::sync::Arc;

use super::reclaimer::DeferredReclaimer;
use super::registrar::JobRegistrar;
use super::service::RelayService;
use super::stager::FileStager;
use super::sweeper::{SweepPolicy, SweepScheduler};
use crate::config::{Config, ConfigError};
use crate::impls::{HttpDownloader, HttpEngine};
use crate::ports::{Clock, Downloader, IdGenerator, SynthesisEngine, SystemClock, UlidGenerator};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cannot create storage directory {path}: {source}")]
    Storage {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct ServiceBuilder {
    config: Config,
    engine: Option<Arc<dyn SynthesisEngine>>,
    downloader: Option<Arc<dyn Downloader>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl ServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            engine: None,
            downloader: None,
            clock: None,
            ids: None,
        }
    }

    pub fn engine(mut self, engine: Arc<dyn SynthesisEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<RelayService, BuildError> {
        let config = self.config;
        config.validate()?;

        let results_dir = config.results_dir();
        std::fs::create_dir_all(&results_dir).map_err(|source| BuildError::Storage {
            path: results_dir.clone(),
            source,
        })?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let engine: Arc<dyn SynthesisEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(HttpEngine::new(config.engine_url.clone(), config.engine_timeout)?),
        };
        let downloader: Arc<dyn Downloader> = match self.downloader {
            Some(downloader) => downloader,
            None => Arc::new(HttpDownloader::new(config.download_timeout)?),
        };

        let registrar = Arc::new(JobRegistrar::new(clock.clone(), ids));
        let stager = FileStager::new(&config, downloader, clock.clone());
        let reclaimer = Arc::new(DeferredReclaimer::new(registrar.clone()));
        let sweeper = Arc::new(SweepScheduler::new(
            config.storage_dir.clone(),
            registrar.clone(),
            clock,
            SweepPolicy::from(&config),
        ));

        tracing::info!(dir = %config.storage_dir.display(), engine = %config.engine_url, "service ready");

        Ok(RelayService::new(
            config, stager, registrar, reclaimer, sweeper, engine,
        ))
    }
}
