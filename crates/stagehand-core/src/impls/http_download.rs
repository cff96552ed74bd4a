//! HttpDownloader - reqwest による `Downloader` 実装
//!
//! レスポンス body はチャンク単位で書き込み先ファイルに流す。
//! リソース全体をメモリに載せることはない。
//!
//! # エラーの対応
//! - タイムアウト → `StagingError::Timeout`
//! - 2xx 以外 → `StagingError::Status`
//! - 接続断など → `StagingError::Request`
//! - 書き込み失敗 → `StagingError::Write`

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::domain::StagingError;
use crate::ports::Downloader;

pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// `timeout` は接続から最後のチャンクまで、転送全体にかかる上限
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn request_error(url: &Url, err: reqwest::Error) -> StagingError {
        if err.is_timeout() {
            StagingError::Timeout {
                url: url.to_string(),
            }
        } else {
            StagingError::Request {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, StagingError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Self::request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StagingError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let write_err = |source| StagingError::Write {
            path: dest.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::request_error(url, e))?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;

        Ok(written)
    }
}
