//! Downloader port - リモートリソースをローカルファイルに転送する
//!
//! この trait が担うのは転送だけ。ファイル名の決定や失敗時の後始末は
//! `FileStager` の責務。

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::domain::StagingError;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// `url` を `dest` にストリーミングで書き込む（作成または切り詰め）
    ///
    /// 書き込んだバイト数を返す。エラー時、`dest` には書きかけのファイルが残りうる。
    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, StagingError>;
}
