//! SynthesisEngine port - メディアを生成する外部エンジン

use async_trait::async_trait;

use crate::domain::{EngineError, EngineStatus, EngineSubmission, JobId};

/// 中身を知らないリモートエンジン
///
/// どちらの呼び出しも成功か失敗のみ。この境界にリトライ方針はない。
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    async fn submit(&self, submission: &EngineSubmission) -> Result<(), EngineError>;

    async fn query(&self, job_id: &JobId) -> Result<EngineStatus, EngineError>;
}
