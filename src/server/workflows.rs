//! ワークフローとステップ操作のエンドポイント
//!
//! # 責務
//!
//! - ワークフローの作成・一覧・取得・ブックマーク
//! - ステップ操作をエグゼキューターへ委譲する
//!
//! ワークフローは作成したユーザーだけが参照・操作できます。
//! 他人のワークフローは存在しない場合と同じ 404 を返します。
//!
//! # ステップ操作
//!
//! `POST /workflows/{id}/steps/{index}/{action}` の `action`:
//!
//! | action | 本文 | 内容 |
//! |--------|------|------|
//! | `start` | `userInput` | ステップを生成 |
//! | `retry` | - | 失敗したステップを同じ入力でやり直す |
//! | `regenerate` | - | 成功したステップを生成し直す |
//! | `edit` | - | 編集を開始 |
//! | `cancel-edit` | - | 編集を取り消す |
//! | `save` | `content` | 編集を保存し、後続を無効化 |
//! | `invalidate` | - | このステップ以降を初期状態に戻す |
//! | `recover` | - | `generating` のまま残ったステップを `error` にする |
//!
//! 生成系の操作に `"stream": true` を付けると、差分を
//! `data: {"delta": "..."}` で流し、最後に `data: {"outcome": {...}}`
//! （失敗時は `data: {"error": {...}}`）を送ります。

use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::error::WORKFLOW_NOT_FOUND;
use super::proxy::EVENT_STREAM;
use super::{ApiError, AppState};
use crate::engine::{ExecutionError, StepOutcome, WorkflowExecutor};
use crate::store::{Workflow, WorkflowSummary};

/// `POST /workflows` の本文
#[derive(Debug, Deserialize)]
pub struct CreateWorkflow {
    pub title: String,
    /// テンプレート名
    pub template: String,
}

/// `PUT /workflows/{id}/bookmark` の本文
#[derive(Debug, Default, Deserialize)]
pub struct BookmarkRequest {
    #[serde(default, alias = "bookmarkTitle")]
    pub bookmark_title: Option<String>,
}

/// ステップ操作の本文（すべて省略可）
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOptions {
    #[serde(default, alias = "user_input")]
    pub user_input: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

impl StepOptions {
    /// 空の本文は既定値として扱う
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))
    }
}

/// 生成系のステップ操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Generation {
    Start,
    Retry,
    Regenerate,
}

/// 呼び出しユーザーのワークフローを取得する
async fn owned(state: &AppState, id: &str, actor: &str) -> Result<Workflow, ApiError> {
    let workflow = state
        .executor
        .store()
        .workflow(id)
        .await
        .map_err(ExecutionError::from)?;
    if workflow.user_id != actor {
        warn!(workflow_id = id, actor, "他ユーザーのワークフローへのアクセスを拒否しました");
        return Err(ApiError::not_found(WORKFLOW_NOT_FOUND));
    }
    Ok(workflow)
}

fn summaries(workflows: Vec<Workflow>) -> Json<Vec<WorkflowSummary>> {
    Json(workflows.iter().map(Workflow::summary).collect())
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WorkflowSummary>>, ApiError> {
    let actor = state.actor(&headers);
    let workflows = state.executor.store().list(&actor).await?;
    Ok(summaries(workflows))
}

pub async fn bookmarked(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WorkflowSummary>>, ApiError> {
    let actor = state.actor(&headers);
    let workflows = state.executor.store().bookmarked(&actor).await?;
    Ok(summaries(workflows))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateWorkflow>, JsonRejection>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let Json(request) = payload?;
    let template = state
        .templates
        .get(&request.template)
        .ok_or_else(|| ApiError::not_found(format!("Template not found: {}", request.template)))?;

    let actor = state.actor(&headers);
    let workflow = state
        .executor
        .create_workflow(&actor, &request.title, template)
        .await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let actor = state.actor(&headers);
    Ok(Json(owned(&state, &id, &actor).await?))
}

pub async fn bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<BookmarkRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let title = request
        .bookmark_title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .ok_or_else(|| ApiError::bad_request("Bookmark title is required"))?;

    let actor = state.actor(&headers);
    owned(&state, &id, &actor).await?;
    let workflow = state.executor.store().set_bookmark(&id, Some(title)).await?;
    info!(workflow_id = %id, "ワークフローをブックマークしました");
    Ok(Json(json!({
        "message": "Workflow bookmarked successfully",
        "workflow": workflow.summary(),
    })))
}

pub async fn unbookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let actor = state.actor(&headers);
    owned(&state, &id, &actor).await?;
    let workflow = state.executor.store().set_bookmark(&id, None).await?;
    Ok(Json(json!({
        "message": "Bookmark removed successfully",
        "workflow": workflow.summary(),
    })))
}

pub async fn step_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, index, action)): Path<(String, usize, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let options = StepOptions::parse(&body)?;
    let actor = state.actor(&headers);
    owned(&state, &id, &actor).await?;
    let executor = &state.executor;

    let generation = match action.as_str() {
        "start" => Generation::Start,
        "retry" => Generation::Retry,
        "regenerate" => Generation::Regenerate,
        other => {
            let context = match other {
                "edit" => executor.begin_edit(&id, index).await?,
                "cancel-edit" => executor.cancel_edit(&id, index).await?,
                "save" => {
                    let content = options
                        .content
                        .ok_or_else(|| ApiError::bad_request("Content is required"))?;
                    executor.save_edit(&id, index, &content).await?
                }
                "invalidate" => executor.invalidate(&id, index).await?,
                "recover" => executor.recover_stuck(&id, index).await?,
                _ => return Err(ApiError::not_found(format!("Unknown step action: {other}"))),
            };
            return Ok(Json(context).into_response());
        }
    };

    let user_input = options.user_input.unwrap_or_default();
    if options.stream {
        return Ok(stream_generation(
            state.executor.clone(),
            generation,
            actor,
            id,
            index,
            user_input,
        ));
    }

    let outcome = run_generation(executor, generation, &actor, &id, index, &user_input, None).await?;
    Ok(Json(outcome).into_response())
}

async fn run_generation(
    executor: &WorkflowExecutor,
    generation: Generation,
    actor: &str,
    id: &str,
    index: usize,
    user_input: &str,
    deltas: Option<mpsc::UnboundedSender<String>>,
) -> Result<StepOutcome, ExecutionError> {
    match generation {
        Generation::Start => {
            executor
                .start_step_streaming(actor, id, index, user_input, deltas)
                .await
        }
        Generation::Retry => executor.retry(actor, id, index, deltas).await,
        Generation::Regenerate => executor.regenerate(actor, id, index, deltas).await,
    }
}

fn event(value: Value) -> Result<Bytes, std::convert::Infallible> {
    Ok(Bytes::from(format!("data: {value}\n\n")))
}

/// 生成をバックグラウンドで実行し、差分と最終結果を SSE で流す
///
/// 接続が切れても生成は最後まで行われ、結果はストアに保存されます。
fn stream_generation(
    executor: Arc<WorkflowExecutor>,
    generation: Generation,
    actor: String,
    id: String,
    index: usize,
    user_input: String,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel();
    let task: JoinHandle<Result<StepOutcome, ExecutionError>> = tokio::spawn(async move {
        run_generation(&executor, generation, &actor, &id, index, &user_input, Some(tx)).await
    });

    let events = stream::unfold(Some((rx, task)), |state| async move {
        let (mut rx, task) = state?;
        if let Some(delta) = rx.recv().await {
            return Some((event(json!({ "delta": delta })), Some((rx, task))));
        }
        let last = match task.await {
            Ok(Ok(outcome)) => json!({ "outcome": outcome }),
            Ok(Err(err)) => {
                let err = ApiError::from(err);
                json!({ "error": { "status": err.status.as_u16(), "message": err.message } })
            }
            Err(join) => {
                warn!(error = %join, "ステップ生成タスクが異常終了しました");
                json!({ "error": { "status": 500, "message": "Step generation was aborted" } })
            }
        };
        Some((event(last), None))
    });

    let mut response = Response::new(Body::from_stream(events));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
