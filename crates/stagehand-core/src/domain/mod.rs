//! Domain - ドメインモデル（ids, job, engine payload, media, errors）

pub mod engine;
pub mod errors;
pub mod ids;
pub mod job;
pub mod media;

pub use engine::{EngineStatus, EngineSubmission};
pub use errors::{EngineError, ReclaimError, RelayError, StagingError};
pub use ids::{InvalidId, JobId};
pub use job::JobRecord;
pub use media::MediaKind;
