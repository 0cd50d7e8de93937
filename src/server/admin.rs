//! 参照系と設定のエンドポイント
//!
//! モデルカタログ、テンプレート、API キー設定、監査ログを扱います。
//! API キーは常にマスクして返します。

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::audit::{DEFAULT_PAGE_LIMIT, InteractionRecord, RecordPage};
use crate::config::WorkflowTemplate;
use crate::credentials::ApiKeys;
use crate::provider::catalog;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// プロバイダー名 → モデル一覧（各モデルに `key` を付ける）
pub async fn models() -> Json<BTreeMap<&'static str, Vec<Value>>> {
    let grouped = catalog::grouped()
        .into_iter()
        .map(|(provider, models)| {
            let entries = models
                .into_iter()
                .map(|model| {
                    let mut entry = json!({ "key": model.key() });
                    if let (Some(entry), Value::Object(fields)) =
                        (entry.as_object_mut(), json!(model))
                    {
                        entry.extend(fields);
                    }
                    entry
                })
                .collect();
            (provider.as_str(), entries)
        })
        .collect();
    Json(grouped)
}

/// テンプレート一覧の 1 件
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateListing {
    pub name: String,
    pub model: String,
    pub step_count: usize,
    pub steps: Vec<String>,
}

impl From<&WorkflowTemplate> for TemplateListing {
    fn from(template: &WorkflowTemplate) -> Self {
        Self {
            name: template.name().to_string(),
            model: template.model().to_string(),
            step_count: template.steps().len(),
            steps: template
                .steps()
                .iter()
                .map(|step| step.name().to_string())
                .collect(),
        }
    }
}

pub async fn templates(State(state): State<AppState>) -> Json<Vec<TemplateListing>> {
    Json(state.templates.iter().map(TemplateListing::from).collect())
}

pub async fn template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkflowTemplate>, ApiError> {
    state
        .templates
        .get(&name)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Template not found: {name}")))
}

pub async fn get_keys(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.credentials.current().await.masked()))
}

/// 指定されたキーだけを更新する。空文字列はキーの削除
pub async fn put_keys(
    State(state): State<AppState>,
    payload: Result<Json<ApiKeys>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(changes) = payload?;
    state.credentials.upsert(changes).await?;
    Ok(Json(json!({
        "message": "API keys updated successfully",
        "keys": state.credentials.current().await.masked(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<RecordPage>, ApiError> {
    let page = state
        .audit
        .list(
            query.page.unwrap_or(1),
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;
    Ok(Json(page))
}

pub async fn get_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InteractionRecord>, ApiError> {
    let not_found = || ApiError::not_found("Log not found");
    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    state.audit.find(id).await?.map(Json).ok_or_else(not_found)
}
