//! FileStager - リモートの入力をストレージディレクトリに取り込む
//!
//! # フロー
//! 1. ファイル名を決める（URL の basename、なければ合成名）
//! 2. `create_new` でパスを予約する（2 つのジョブが同じファイルを共有しないため）
//! 3. `Downloader` port 経由でストリーミング書き込み
//! 4. 失敗時は書きかけのファイルを削除してからエラーを返す
//!
//! # ファイル名
//! - basename に拡張子があればそれを使う
//! - 拡張子がない、または既に使われている場合は
//!   `<unix 秒>_<kind>_<16 進 8 桁>.<ext>` を合成する

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;

use crate::config::Config;
use crate::domain::errors::remove_file_quietly;
use crate::domain::{MediaKind, StagingError};
use crate::ports::{Clock, Downloader};

/// ステージ済みの入力（エンジンから見えるパスとローカルのパス）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub engine_path: String,
    pub local_path: PathBuf,
    pub bytes: u64,
}

pub struct FileStager {
    storage_dir: PathBuf,
    engine_data_dir: String,
    downloader: Arc<dyn Downloader>,
    clock: Arc<dyn Clock>,
}

impl FileStager {
    pub fn new(config: &Config, downloader: Arc<dyn Downloader>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage_dir: config.storage_dir.clone(),
            engine_data_dir: config.engine_data_dir.clone(),
            downloader,
            clock,
        }
    }

    pub async fn stage(&self, url: &str, kind: MediaKind) -> Result<StagedFile, StagingError> {
        let parsed = Url::parse(url).map_err(|e| StagingError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let (file_name, local_path) = self.reserve(&parsed, kind).await?;
        tracing::info!(%kind, url = %parsed, path = %local_path.display(), "downloading input");

        match self.downloader.download(&parsed, &local_path).await {
            Ok(bytes) => {
                tracing::info!(%kind, path = %local_path.display(), bytes, "download complete");
                Ok(StagedFile {
                    engine_path: self.engine_path(&file_name),
                    local_path,
                    bytes,
                })
            }
            Err(err) => {
                discard_partial(&local_path).await;
                tracing::error!(%kind, url = %parsed, error = %err, "download failed");
                Err(err)
            }
        }
    }

    /// エンジン側のマウントから見たパス
    fn engine_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.engine_data_dir.trim_end_matches('/'), file_name)
    }

    /// このダウンロード用に新しいパスを確保する
    ///
    /// リモートの basename を優先し、他のジョブが同名ファイルを持っていれば合成名を使う。
    async fn reserve(&self, url: &Url, kind: MediaKind) -> Result<(String, PathBuf), StagingError> {
        let now = self.clock.now();
        let preferred = remote_file_name(url);

        if let Some(name) = &preferred {
            let path = self.storage_dir.join(name);
            match create_new(&path).await {
                Ok(()) => return Ok((name.clone(), path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(path = %path.display(), "name taken, synthesizing another");
                }
                Err(source) => return Err(StagingError::Write { path, source }),
            }
        }

        let extension = preferred
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .unwrap_or(kind.default_extension())
            .to_string();

        // 乱数部分が衝突したら共有せずに引き直す
        loop {
            let name = synthesized_file_name(now, kind, &extension);
            let path = self.storage_dir.join(&name);
            match create_new(&path).await {
                Ok(()) => return Ok((name, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(StagingError::Write { path, source }),
            }
        }
    }
}

async fn create_new(path: &Path) -> io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map(drop)
}

async fn discard_partial(path: &Path) {
    match remove_file_quietly(path).await {
        Ok(true) => tracing::info!(path = %path.display(), "removed partial download"),
        Ok(false) => {}
        Err(err) => err.report(),
    }
}

/// URL の最後のセグメント（拡張子付きのファイル名に見える場合のみ）
fn remote_file_name(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() || !last.contains('.') || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}

/// `<unix seconds>_<kind>_<8 hex>.<ext>`
fn synthesized_file_name(now: DateTime<Utc>, kind: MediaKind, extension: &str) -> String {
    format!(
        "{}_{}_{:08x}.{}",
        now.timestamp(),
        kind,
        rand::random::<u32>(),
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDownloader, Transfer, fixed_clock};
    use rstest::rstest;

    fn stager(dir: &Path, downloader: FakeDownloader) -> FileStager {
        let config = Config {
            storage_dir: dir.to_path_buf(),
            ..Config::default()
        };
        FileStager::new(&config, Arc::new(downloader), Arc::new(fixed_clock()))
    }

    #[rstest]
    #[case::plain("http://cdn.example/media/voice.wav", Some("voice.wav"))]
    #[case::query_ignored("http://cdn.example/v/clip.mp4?token=abc", Some("clip.mp4"))]
    #[case::no_extension("http://cdn.example/media/voice", None)]
    #[case::trailing_slash("http://cdn.example/media/", None)]
    #[case::root("http://cdn.example", None)]
    fn remote_names(#[case] url: &str, #[case] expected: Option<&str>) {
        let url = Url::parse(url).unwrap();
        assert_eq!(remote_file_name(&url).as_deref(), expected);
    }

    #[test]
    fn synthesized_name_shape() {
        let now = fixed_clock().now();
        let name = synthesized_file_name(now, MediaKind::Audio, "mp3");

        let prefix = format!("{}_audio_", now.timestamp());
        assert!(name.starts_with(&prefix));
        let rest = name.strip_prefix(&prefix).unwrap();
        let (hex, ext) = rest.split_once('.').unwrap();
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ext, "mp3");
    }

    #[tokio::test]
    async fn stages_under_remote_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = "http://cdn.example/a.mp3";
        let stager = stager(
            dir.path(),
            FakeDownloader::default().with(url, Transfer::Body(b"abc".to_vec())),
        );

        let staged = stager.stage(url, MediaKind::Audio).await.unwrap();

        assert_eq!(staged.local_path, dir.path().join("a.mp3"));
        assert_eq!(staged.engine_path, "/code/data/a.mp3");
        assert_eq!(staged.bytes, 3);
        assert_eq!(std::fs::read(&staged.local_path).unwrap(), b"abc");
    }

    #[rstest]
    #[case::audio(MediaKind::Audio, "mp3")]
    #[case::video(MediaKind::Video, "mp4")]
    #[tokio::test]
    async fn synthesizes_name_without_extension(#[case] kind: MediaKind, #[case] ext: &str) {
        let dir = tempfile::tempdir().unwrap();
        let url = "http://cdn.example/download";
        let stager = stager(
            dir.path(),
            FakeDownloader::default().with(url, Transfer::Body(b"x".to_vec())),
        );

        let staged = stager.stage(url, kind).await.unwrap();

        let name = staged.local_path.file_name().unwrap().to_str().unwrap();
        assert!(name.contains(&format!("_{kind}_")));
        assert!(name.ends_with(&format!(".{ext}")));
        assert!(staged.engine_path.ends_with(name));
    }

    #[test]
    fn engine_path_joins_without_double_slash() {
        let config = Config {
            engine_data_dir: "/code/data/".to_string(),
            ..Config::default()
        };
        let stager = FileStager::new(
            &config,
            Arc::new(FakeDownloader::default()),
            Arc::new(fixed_clock()),
        );
        assert_eq!(stager.engine_path("a.mp3"), "/code/data/a.mp3");
    }

    #[tokio::test]
    async fn taken_name_gets_a_fresh_one() {
        let dir = tempfile::tempdir().unwrap();
        let url = "http://cdn.example/a.mp4";
        let stager = stager(
            dir.path(),
            FakeDownloader::default().with(url, Transfer::Body(b"second".to_vec())),
        );
        std::fs::write(dir.path().join("a.mp4"), b"first").unwrap();

        let staged = stager.stage(url, MediaKind::Video).await.unwrap();

        assert_ne!(staged.local_path, dir.path().join("a.mp4"));
        assert!(staged.local_path.to_str().unwrap().ends_with(".mp4"));
        assert_eq!(std::fs::read(dir.path().join("a.mp4")).unwrap(), b"first");
        assert_eq!(std::fs::read(&staged.local_path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn partial_download_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let url = "http://cdn.example/b.mp4";
        let stager = stager(
            dir.path(),
            FakeDownloader::default().with(url, Transfer::Partial(b"half".to_vec())),
        );

        let err = stager.stage(url, MediaKind::Video).await.unwrap_err();

        assert!(matches!(err, StagingError::Request { .. }));
        assert!(!dir.path().join("b.mp4").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_status_leaves_no_reservation_behind() {
        let dir = tempfile::tempdir().unwrap();
        let url = "http://cdn.example/c.mp4";
        let stager = stager(dir.path(), FakeDownloader::default().with(url, Transfer::Status(503)));

        let err = stager.stage(url, MediaKind::Video).await.unwrap_err();

        assert!(matches!(err, StagingError::Status { status: 503, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let stager = stager(dir.path(), FakeDownloader::default());

        let err = stager.stage("not a url", MediaKind::Audio).await.unwrap_err();

        assert!(matches!(err, StagingError::InvalidUrl { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
