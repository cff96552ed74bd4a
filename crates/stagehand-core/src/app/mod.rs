//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてファイルのライフサイクルを実装します。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder**: 構築とワイヤリング（fail-fast な検証）
//! - **RelayService**: submit / query / fetch の入口
//! - **FileStager**: 入力をストレージに取り込む
//! - **JobRegistrar**: ジョブ ID → 所有ファイル
//! - **DeferredReclaimer**: タイマー駆動の遅延削除ワーカー
//! - **SweepScheduler**: orphan / stale ファイルの定期回収

pub mod builder;
pub mod reclaimer;
pub mod registrar;
pub mod service;
pub mod stager;
pub mod status;
pub mod sweeper;

pub use self::builder::{BuildError, ServiceBuilder};
pub use self::reclaimer::DeferredReclaimer;
pub use self::registrar::JobRegistrar;
pub use self::service::{RelayService, ResultPayload, Workers};
pub use self::stager::{FileStager, StagedFile};
pub use self::status::{JobTable, ServiceStatus};
pub use self::sweeper::{SweepPolicy, SweepReport, SweepScheduler, SweepState, SweepStatus};
