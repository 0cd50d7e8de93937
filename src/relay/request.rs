//! リレーへのリクエスト
//!
//! # 責務
//!
//! - 呼び出し元（HTTP）向けのリクエスト [`RelayRequest`] のデシリアライズ
//! - 検証済みの内部呼び出し [`RelayCall`] への変換
//!
//! ## 変換フロー
//!
//! ```text
//! JSON ボディ
//!   ↓ (デシリアライズ)
//! RelayRequest
//!   ↓ (into_call で検証: apiConfig.path 必須、provider の解決)
//! RelayCall { CanonicalRequest, path, CallMetadata }
//! ```
//!
//! エンジンは [`RelayCall`] を直接組み立てます。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::provider::{CanonicalRequest, ChatMessage, Provider};

/// `apiConfig` が欠けている・不正な場合のメッセージ
pub const MISSING_API_CONFIG: &str = "API configuration is missing or invalid.";

/// 呼び出し元向けリクエスト
///
/// フィールド名は camelCase ですが、`workflow_id` などの snake_case も受け付けます。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// プロバイダー名（`OpenAI` / `Google` / `Anthropic`）
    pub provider: String,
    pub model_id: String,
    pub body: RelayBody,
    #[serde(default)]
    pub global_instruction: Option<String>,
    #[serde(default)]
    pub api_config: Option<ApiConfig>,
    #[serde(default, alias = "workflow_id")]
    pub workflow_id: Option<String>,
    #[serde(default, alias = "template_name")]
    pub template_name: Option<String>,
    #[serde(default, alias = "step_index")]
    pub step_index: Option<usize>,
    #[serde(default, alias = "prompt_details")]
    pub prompt_details: Option<Value>,
}

/// リクエスト本文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayBody {
    pub messages: Vec<ChatMessage>,
}

/// 呼び出し設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API パス
    #[serde(default)]
    pub path: Option<String>,
    /// 省略時はストリーミング
    #[serde(default)]
    pub stream: Option<bool>,
}

/// 監査レコードに載せる呼び出し情報
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallMetadata {
    /// 呼び出したユーザー
    pub actor: String,
    pub workflow_id: Option<String>,
    pub template_name: Option<String>,
    /// `None` はエンジン内部の要約呼び出し
    pub step_index: Option<usize>,
    /// プロンプトの出所（テンプレート、要約、履歴など）
    pub prompt_details: Option<Value>,
}

/// 検証済みのリレー呼び出し
#[derive(Debug, Clone)]
pub struct RelayCall {
    pub request: CanonicalRequest,
    /// API パス（`{modelId}` を含む場合あり）
    pub path: String,
    pub metadata: CallMetadata,
}

impl RelayRequest {
    /// 検証して [`RelayCall`] に変換する
    ///
    /// # エラー
    ///
    /// - `apiConfig.path` が無い・空の場合 [`MISSING_API_CONFIG`]
    /// - 未知のプロバイダー
    ///
    /// どちらも [`RelayError::Configuration`] です。
    pub fn into_call(self, actor: impl Into<String>) -> Result<RelayCall, RelayError> {
        let api_config = self.api_config.unwrap_or_default();
        let path = api_config
            .path
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| RelayError::Configuration(MISSING_API_CONFIG.to_string()))?;
        let provider: Provider = self.provider.parse()?;

        Ok(RelayCall {
            request: CanonicalRequest {
                provider,
                model_id: self.model_id,
                messages: self.body.messages,
                global_instruction: self.global_instruction,
                stream: api_config.stream.unwrap_or(true),
            },
            path,
            metadata: CallMetadata {
                actor: actor.into(),
                workflow_id: self.workflow_id,
                template_name: self.template_name,
                step_index: self.step_index,
                prompt_details: self.prompt_details,
            },
        })
    }
}
