//! stagehand-core
//!
//! 外部のリップシンク合成エンジンに中継するジョブの、
//! ファイル取り込みとライフサイクル管理。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, engine payload, media, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, SynthesisEngine, Downloader）
//! - **impls**: 実装（エンジンとダウンローダーの HTTP アダプタ）
//! - **app**: アプリケーションロジック（builder, service, stager, registrar, reclaimer, sweeper）
//! - **config**: 実行時設定と検証

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
mod testing;

/// エンジンが結果を書き込む、ストレージ配下のサブディレクトリ
pub const RESULTS_SUBDIR: &str = "temp";
