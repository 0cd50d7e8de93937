//! ステップ操作の結果型とエラー型
//!
//! # 責務
//!
//! - ステップ生成 1 回分の結果 [`StepOutcome`] の型定義
//! - ステップ状態機械の操作エラー [`ExecutionError`] の型定義
//!
//! プロバイダー呼び出しの失敗は `ExecutionError` にはなりません。
//! 失敗はステップの `status = error` として記録され、[`StepOutcome`] で返されます。
//! `ExecutionError` になるのは、遷移の拒否とストアへの書き込み失敗など、操作自体が成立しない場合だけです。

use serde::Serialize;
use thiserror::Error;

use crate::engine::context::{ExecutionContext, StepStatus, TransitionError};
use crate::error::{ConfigError, RelayError, StoreError};

/// ステップ生成の結果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    /// ワークフロー ID
    pub workflow_id: String,

    /// ステップインデックス（0始まり）
    pub index: usize,

    /// 生成後のステータス（`success` または `error`）
    pub status: StepStatus,

    /// 生成テキスト、またはユーザー向けエラーメッセージ
    pub content: String,

    /// このステップの前に要約を再生成したか
    pub summarized: bool,

    /// 生成に要した時間（ミリ秒）
    pub duration_ms: u64,

    /// 書き込み後の実行コンテキスト
    pub context: ExecutionContext,
}

impl StepOutcome {
    /// 生成に成功したかどうか
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// 実行エラー
///
/// # エラー種別
///
/// - [`ExecutionError::ConfigError`] - テンプレートやモデル設定の不備
/// - [`ExecutionError::RelayError`] - 要約などエンジン内部の呼び出しで復旧できない失敗
/// - [`ExecutionError::StoreError`] - ストアへの読み書き失敗（状態の乖離を避けるため操作ごと失敗させる）
/// - [`ExecutionError::TransitionError`] - 状態遷移の拒否
/// - [`ExecutionError::ValidationError`] - 入力値の不備
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum ExecutionError {
    /// 設定エラー
    #[error("設定エラー: {0}")]
    ConfigError(#[from] ConfigError),

    /// リレーエラー
    #[error("リレーエラー: {0}")]
    RelayError(#[from] RelayError),

    /// ストアエラー
    #[error("ストアエラー: {0}")]
    StoreError(StoreError),

    /// 遷移エラー
    #[error("遷移エラー: {0}")]
    TransitionError(#[from] TransitionError),

    /// バリデーションエラー
    #[error("バリデーションエラー: {0}")]
    ValidationError(String),
}

/// 遷移の拒否はストア経由でも [`ExecutionError::TransitionError`] として扱う
impl From<StoreError> for ExecutionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(transition) => ExecutionError::TransitionError(transition),
            other => ExecutionError::StoreError(other),
        }
    }
}

impl ExecutionError {
    /// 指定ワークフローが存在しないことによるエラーか
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecutionError::StoreError(StoreError::NotFound(_)))
    }
}
