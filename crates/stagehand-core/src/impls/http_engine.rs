//! HttpEngine - 合成エンジン HTTP API の reqwest クライアント
//!
//! # エンドポイント
//! - `POST {base}/easy/submit`: HTTP 200 かつ body の `code == 10000` なら受理
//! - `GET {base}/easy/query?code=<job id>`: `{code, data}` を返す
//!
//! `data` の中身はエンジン依存なので解釈せずにそのまま返す。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;

use crate::domain::{EngineError, EngineStatus, EngineSubmission, JobId};
use crate::ports::SynthesisEngine;

/// 受理時にエンジンが返す body の `code`
const SUBMIT_ACCEPTED: i64 = 10000;

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    audio_url: &'a str,
    video_url: &'a str,
    code: String,
    chaofen: u8,
    watermark_switch: u8,
    pn: u8,
}

pub struct HttpEngine {
    client: Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn ensure_ok(response: Response) -> Result<Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn unreachable(err: reqwest::Error) -> EngineError {
    EngineError::Unreachable(err.to_string())
}

#[async_trait]
impl SynthesisEngine for HttpEngine {
    async fn submit(&self, submission: &EngineSubmission) -> Result<(), EngineError> {
        let body = SubmitBody {
            audio_url: &submission.audio_path,
            video_url: &submission.video_path,
            code: submission.job_id.to_string(),
            chaofen: 0,
            watermark_switch: 0,
            pn: 1,
        };

        let response = self
            .client
            .post(self.endpoint("easy/submit"))
            .json(&body)
            .send()
            .await
            .map_err(unreachable)?;
        let response = Self::ensure_ok(response).await?;

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        if result.get("code").and_then(serde_json::Value::as_i64) != Some(SUBMIT_ACCEPTED) {
            return Err(EngineError::Rejected(result));
        }
        Ok(())
    }

    async fn query(&self, job_id: &JobId) -> Result<EngineStatus, EngineError> {
        let response = self
            .client
            .get(self.endpoint("easy/query"))
            .query(&[("code", job_id.to_string())])
            .send()
            .await
            .map_err(unreachable)?;
        let response = Self::ensure_ok(response).await?;

        response
            .json::<EngineStatus>()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use ulid::Ulid;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn submission() -> EngineSubmission {
        EngineSubmission {
            job_id: JobId::from_ulid(Ulid::new()),
            audio_path: "/code/data/a.mp3".to_string(),
            video_path: "/code/data/b.mp4".to_string(),
        }
    }

    #[tokio::test]
    async fn submit_sends_paths_and_code() {
        let app = Router::new().route(
            "/easy/submit",
            post(|Json(body): Json<Value>| async move {
                let ok = body["audio_url"] == "/code/data/a.mp3"
                    && body["video_url"] == "/code/data/b.mp4"
                    && body["code"].as_str().is_some_and(|c| c.starts_with("job-"))
                    && body["pn"] == 1;
                Json(json!({ "code": if ok { 10000 } else { 1 } }))
            }),
        );
        let engine = HttpEngine::new(serve(app).await, Duration::from_secs(5)).unwrap();

        engine.submit(&submission()).await.unwrap();
    }

    #[tokio::test]
    async fn submit_with_other_code_is_rejected() {
        let app = Router::new().route(
            "/easy/submit",
            post(|| async { Json(json!({ "code": 10002, "msg": "busy" })) }),
        );
        let engine = HttpEngine::new(serve(app).await, Duration::from_secs(5)).unwrap();

        let err = engine.submit(&submission()).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(body) if body["msg"] == "busy"));
    }

    #[tokio::test]
    async fn submit_with_http_error_reports_status() {
        let app = Router::new().route(
            "/easy/submit",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down") }),
        );
        let engine = HttpEngine::new(serve(app).await, Duration::from_secs(5)).unwrap();

        let err = engine.submit(&submission()).await.unwrap_err();
        assert!(matches!(err, EngineError::Status { status: 500, ref body } if body == "down"));
    }

    #[tokio::test]
    async fn query_returns_engine_status() {
        let app = Router::new().route(
            "/easy/query",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(json!({
                    "code": 10000,
                    "data": { "status": 2, "progress": 100, "result": "/temp/x-r.mp4", "code": params["code"] }
                }))
            }),
        );
        let engine = HttpEngine::new(serve(app).await, Duration::from_secs(5)).unwrap();
        let job_id = JobId::from_ulid(Ulid::new());

        let status = engine.query(&job_id).await.unwrap();

        assert_eq!(status.code, Some(10000));
        assert!(status.is_finished());
        assert_eq!(status.result_filename().as_deref(), Some("x-r.mp4"));
        assert_eq!(status.data["code"], job_id.to_string());
    }

    #[tokio::test]
    async fn unreachable_engine_is_reported() {
        // テスト環境では localhost:9 で何も listen していない
        let engine = HttpEngine::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();

        let err = engine.query(&JobId::from_ulid(Ulid::new())).await.unwrap_err();
        assert!(matches!(err, EngineError::Unreachable(_)));
    }
}
