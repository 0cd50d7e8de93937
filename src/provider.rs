//! LLMプロバイダー抽象化レイヤー（ワイヤー形式アダプター）
//!
//! # 責務
//!
//! - 3 種類のプロバイダー（OpenAI, Google, Anthropic）を閉じた列挙型 [`Provider`] で表現
//! - 正規形リクエスト [`CanonicalRequest`] からプロバイダー固有のワイヤーリクエストへの変換
//! - プロバイダー固有のストリームイベントから増分テキストの抽出
//! - 選択可能なモデルのカタログ管理（[`catalog`]）
//!
//! # アーキテクチャ
//!
//! このモジュールは **I/O を一切行いません**。HTTP 通信は [`crate::relay`] が担当し、
//! ここではリクエストの組み立てとレスポンスの解釈だけを行います。
//!
//! | Provider  | 形式 | メッセージ | 指示文 |
//! |-----------|------|-----------|--------|
//! | OpenAI    | A: メッセージ配列 | `messages` | 先頭の `system` メッセージ |
//! | Google    | B: ロール写像 | `contents`（`assistant → model`） | `system_instruction` |
//! | Anthropic | C: システムプロンプト | `messages` | トップレベルの `system` |
//!
//! # モジュール構成
//!
//! - `canonical` - プロバイダー非依存の正規形リクエスト
//! - `traits` - 共通インターフェース（[`WireAdapter`]トレイト等）
//! - `catalog` - モデルカタログ
//! - `openai` / `google` / `anthropic` - 各形式のアダプター
//!
//! # 使用例
//!
//! ```rust
//! use stepchain::provider::{CanonicalRequest, ChatMessage, Provider};
//!
//! let request = CanonicalRequest {
//!     provider: Provider::Anthropic,
//!     model_id: "claude-sonnet-4-20250514".to_string(),
//!     messages: vec![ChatMessage::user("Hello!")],
//!     global_instruction: Some("You are a helpful assistant.".to_string()),
//!     stream: true,
//! };
//!
//! let body = Provider::Anthropic.adapter().build_body(&request);
//! assert_eq!(body["system"], "You are a helpful assistant.");
//! assert_eq!(body["max_tokens"], 4096);
//! ```

pub mod anthropic;
pub mod canonical;
pub mod catalog;
pub mod google;
pub mod openai;
pub mod traits;

// 公開APIの再エクスポート
pub use canonical::{CanonicalRequest, ChatMessage, Role};
pub use catalog::{ModelSpec, resolve_model};
pub use traits::{WireAdapter, WireRequest, extract_message_text};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// AI プロバイダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    /// OpenAI（形式 A）
    #[serde(rename = "OpenAI")]
    OpenAi,
    /// Google Gemini（形式 B）
    Google,
    /// Anthropic Claude（形式 C）
    Anthropic,
}

impl Provider {
    /// すべてのプロバイダー
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Google, Provider::Anthropic];

    /// 表示名（モデルキーの接頭辞にも使用）
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Google => "Google",
            Provider::Anthropic => "Anthropic",
        }
    }

    /// 設定ファイル上の API キー名
    pub fn credential_key(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai_api_key",
            Provider::Google => "google_api_key",
            Provider::Anthropic => "anthropic_api_key",
        }
    }

    /// API キーのフォールバック環境変数名
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Google => "GOOGLE_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// このプロバイダーのワイヤー形式アダプター
    ///
    /// アダプターは状態を持たないため `'static` な参照を返します。
    pub fn adapter(self) -> &'static dyn WireAdapter {
        match self {
            Provider::OpenAi => &openai::OpenAiAdapter,
            Provider::Google => &google::GoogleAdapter,
            Provider::Anthropic => &anthropic::AnthropicAdapter,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 大文字小文字を区別せずに解釈する。未知の値は [`RelayError::Configuration`]
impl FromStr for Provider {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RelayError::Configuration(format!("Unsupported provider: {s}")))
    }
}
