//! TOML デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! このモジュールは、テンプレートファイルからのデータ読み込み専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//!
//! ## 変換フロー
//!
//! ```text
//! TOML ファイル / ワークフローのスナップショット (JSON)
//!   ↓ (デシリアライズ)
//! TemplateDto
//!   ↓ (TryFrom でバリデーション)
//! WorkflowTemplate (ドメインモデル)
//! ```

use serde::{Deserialize, Serialize};

/// テンプレート DTO
///
/// **注**: この構造体は config モジュール内部の実装詳細です。
/// 外部からは [`WorkflowTemplate`](super::template::WorkflowTemplate) を使用してください。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct TemplateDto {
    pub(super) name: String,
    /// 既定のモデルキー（`"<Provider>__<modelId>"`）
    pub(super) model: String,
    #[serde(default, alias = "globalInstruction", skip_serializing_if = "Option::is_none")]
    pub(super) global_instruction: Option<String>,
    #[serde(default)]
    pub(super) steps: Vec<TemplateStepDto>,
}

/// テンプレートステップ DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct TemplateStepDto {
    pub(super) name: String,
    /// ユーザーへの入力案内
    #[serde(default)]
    pub(super) instruction: String,
    /// ユーザー入力の前に付けるプロンプト
    #[serde(default)]
    pub(super) prompt: String,
    /// テンプレートの既定モデルを上書きするモデルキー
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) model: Option<String>,
}
