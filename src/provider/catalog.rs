//! モデルカタログ
//!
//! # 責務
//!
//! - 選択可能なモデルの定数テーブルを管理
//! - モデルキー（`"<Provider>__<modelId>"`）から [`ModelSpec`] を解決
//!
//! # カタログ
//!
//! | Provider  | modelId | API パス | stream |
//! |-----------|---------|----------|--------|
//! | OpenAI    | gpt-5 | `/v1/chat/completions` | false |
//! | OpenAI    | gpt-5-mini, gpt-5-nano, gpt-4.1, gpt-4.1-mini, gpt-4o, o3, o3-mini | `/v1/chat/completions` | true |
//! | Google    | gemini-2.5-pro, gemini-2.5-flash, gemini-2.0-flash | `/v1beta/models/{modelId}:streamGenerateContent` | true |
//! | Anthropic | claude-opus-4-1-20250805, claude-sonnet-4-20250514 | `/v1/messages` | true |
//!
//! # 使用例
//!
//! ```rust
//! use stepchain::provider::catalog::resolve_model;
//! use stepchain::provider::Provider;
//!
//! let spec = resolve_model("OpenAI__gpt-4o").unwrap();
//! assert_eq!(spec.provider, Provider::OpenAi);
//! assert_eq!(spec.api.path, "/v1/chat/completions");
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use super::Provider;

/// モデルキーの区切り文字
pub const KEY_SEPARATOR: &str = "__";

const OPENAI_PATH: &str = "/v1/chat/completions";
const GOOGLE_PATH: &str = "/v1beta/models/{modelId}:streamGenerateContent";
const ANTHROPIC_PATH: &str = "/v1/messages";

/// 呼び出し設定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiSpec {
    /// API パス（形式 B では `{modelId}` を含むテンプレート）
    pub path: &'static str,
    /// ストリーミングで呼び出すか
    pub stream: bool,
}

/// モデル定義
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub provider: Provider,
    pub model_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub api: ApiSpec,
}

impl ModelSpec {
    /// モデルキー（例: `OpenAI__gpt-4o`）
    pub fn key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.provider.as_str(), self.model_id)
    }
}

const fn model(
    provider: Provider,
    model_id: &'static str,
    name: &'static str,
    description: &'static str,
    path: &'static str,
    stream: bool,
) -> ModelSpec {
    ModelSpec {
        provider,
        model_id,
        name,
        description,
        api: ApiSpec { path, stream },
    }
}

static MODELS: [ModelSpec; 13] = [
    model(Provider::OpenAi, "gpt-5", "GPT-5", "Most capable model for complex coding and agentic tasks", OPENAI_PATH, false),
    model(Provider::OpenAi, "gpt-5-mini", "GPT-5 Mini", "Fast, cost-efficient model for everyday tasks", OPENAI_PATH, true),
    model(Provider::OpenAi, "gpt-5-nano", "GPT-5 Nano", "Fastest and cheapest, for simple high-volume work", OPENAI_PATH, true),
    model(Provider::OpenAi, "gpt-4.1", "GPT-4.1", "Analysis and writing without explicit reasoning", OPENAI_PATH, true),
    model(Provider::OpenAi, "gpt-4.1-mini", "GPT-4.1 Mini", "Small tasks such as Q&A and classification", OPENAI_PATH, true),
    model(Provider::OpenAi, "gpt-4o", "GPT-4o", "High-performance multimodal model", OPENAI_PATH, true),
    model(Provider::OpenAi, "o3", "o3 (Reasoning)", "Long, deep reasoning for hard problems", OPENAI_PATH, true),
    model(Provider::OpenAi, "o3-mini", "o3 Mini (Reasoning)", "Fast, cost-efficient small reasoning model", OPENAI_PATH, true),
    model(Provider::Google, "gemini-2.5-pro", "Gemini 2.5 Pro", "Top performance for complex problems", GOOGLE_PATH, true),
    model(Provider::Google, "gemini-2.5-flash", "Gemini 2.5 Flash", "Cost-efficient with adaptive thinking", GOOGLE_PATH, true),
    model(Provider::Google, "gemini-2.0-flash", "Gemini 2.0 Flash", "Next-generation features, real-time streaming", GOOGLE_PATH, true),
    model(Provider::Anthropic, "claude-opus-4-1-20250805", "Claude Opus 4.1", "Highest capability, complex thinking", ANTHROPIC_PATH, true),
    model(Provider::Anthropic, "claude-sonnet-4-20250514", "Claude Sonnet 4", "Balance of performance and cost", ANTHROPIC_PATH, true),
];

/// カタログの全モデル
pub fn all_models() -> &'static [ModelSpec] {
    &MODELS
}

/// モデルキーから定義を解決する
///
/// キーは `"<Provider>__<modelId>"` 形式です。プロバイダー名は大文字小文字を区別しません。
/// 形式が不正な場合や未登録のモデルの場合は `None` を返します。
pub fn resolve_model(key: &str) -> Option<&'static ModelSpec> {
    let (provider, model_id) = key.split_once(KEY_SEPARATOR)?;
    let provider: Provider = provider.parse().ok()?;
    MODELS
        .iter()
        .find(|spec| spec.provider == provider && spec.model_id == model_id)
}

/// プロバイダーごとにまとめたカタログ
pub fn grouped() -> BTreeMap<Provider, Vec<&'static ModelSpec>> {
    let mut groups: BTreeMap<Provider, Vec<&'static ModelSpec>> = BTreeMap::new();
    for spec in &MODELS {
        groups.entry(spec.provider).or_default().push(spec);
    }
    groups
}
