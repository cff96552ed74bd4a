//! Impls - port の本番用実装

pub mod http_download;
pub mod http_engine;

pub use self::http_download::HttpDownloader;
pub use self::http_engine::HttpEngine;
