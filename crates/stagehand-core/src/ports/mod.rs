//! Ports - 抽象化レイヤー
//!
//! 外部との境界を trait で切り出し、ライフサイクルのロジックを fake で検証できるようにします。
//!
//! # 主要な trait
//! - **Clock**: 時刻
//! - **IdGenerator**: ID 生成
//! - **SynthesisEngine**: 外部の合成エンジン
//! - **Downloader**: 入力の転送

pub mod clock;
pub mod downloader;
pub mod engine;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::downloader::Downloader;
pub use self::engine::SynthesisEngine;
pub use self::id_generator::{IdGenerator, UlidGenerator};
