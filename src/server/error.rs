//! HTTP エラー応答
//!
//! すべてのエラーは `{"message": "..."}` と HTTP ステータスで表現します。
//! 機械可読なエラーコードは持ちません。

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::engine::ExecutionError;
use crate::error::{AuditError, CredentialError, RelayError, StoreError};

/// リレーが通信に失敗した場合のメッセージ
pub const PROXY_FAILURE: &str = "LLM proxy request failed.";

/// ワークフローが無い、または他ユーザーのものである場合のメッセージ
pub const WORKFLOW_NOT_FOUND: &str = "Workflow not found or access denied";

/// ハンドラーのエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// - `Configuration` → 400（メッセージをそのまま返す）
/// - それ以外 → 500 [`PROXY_FAILURE`]
impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Configuration(message) => Self::bad_request(message),
            other => {
                error!(error = %other, "LLM プロキシ要求に失敗しました");
                Self::internal(PROXY_FAILURE)
            }
        }
    }
}

/// - ワークフローが無い → 404
/// - 遷移の拒否 → 409
/// - 入力・設定の不備 → 400
/// - ストアの入出力 → 500
impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            err if err.is_not_found() => Self::not_found(WORKFLOW_NOT_FOUND),
            ExecutionError::TransitionError(transition) => {
                Self::new(StatusCode::CONFLICT, transition.to_string())
            }
            ExecutionError::ValidationError(message) => Self::bad_request(message),
            ExecutionError::ConfigError(config) => Self::bad_request(config.to_string()),
            ExecutionError::RelayError(relay) => relay.into(),
            ExecutionError::StoreError(store) => store.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::not_found(WORKFLOW_NOT_FOUND),
            StoreError::Rejected(transition) => {
                Self::new(StatusCode::CONFLICT, transition.to_string())
            }
            other => {
                error!(error = %other, "ワークフローストアの操作に失敗しました");
                Self::internal("Failed to access workflow storage")
            }
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        error!(error = %err, "API キーの保存に失敗しました");
        Self::internal("Failed to update API keys")
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        error!(error = %err, "監査ログの読み込みに失敗しました");
        Self::internal("Failed to read interaction logs")
    }
}
