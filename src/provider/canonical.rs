//! プロバイダー非依存の正規形リクエスト
//!
//! [`CanonicalRequest`] はアダプターに渡る前の唯一の表現です。
//! `messages` は空でなく、先頭の任意の `system` を除いて `user` / `assistant` が交互に並びます。

use serde::{Deserialize, Serialize};

use super::Provider;
use crate::error::RelayError;

/// メッセージのロール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 会話メッセージ 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// 正規形リクエスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRequest {
    pub provider: Provider,
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_instruction: Option<String>,
    pub stream: bool,
}

impl CanonicalRequest {
    /// 空白のみの指示文は「指示なし」として扱う
    pub fn instruction(&self) -> Option<&str> {
        self.global_instruction
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    /// 先頭の `system` メッセージ（存在する場合）
    pub fn leading_system(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// `system` を除いた会話メッセージ
    pub fn conversation(&self) -> &[ChatMessage] {
        match self.leading_system() {
            Some(_) => &self.messages[1..],
            None => &self.messages,
        }
    }

    /// 指示文と先頭 `system` を結合したもの（形式 B / C の指示フィールド用）
    pub fn combined_instruction(&self) -> Option<String> {
        match (self.instruction(), self.leading_system()) {
            (Some(global), Some(system)) => Some(format!("{global}\n\n{system}")),
            (Some(global), None) => Some(global.to_string()),
            (None, Some(system)) => Some(system.to_string()),
            (None, None) => None,
        }
    }

    /// 不変条件の検証
    ///
    /// # エラー
    ///
    /// - モデル ID が空
    /// - `messages` が空、または `system` 以外のメッセージがない
    /// - 内容が空のメッセージがある
    /// - `system` が先頭以外にある
    /// - 同じロールが連続している
    pub fn validate(&self) -> Result<(), RelayError> {
        let invalid = |msg: &str| Err(RelayError::Configuration(msg.to_string()));

        if self.model_id.trim().is_empty() {
            return invalid("modelId is required.");
        }
        if self.conversation().is_empty() {
            return invalid("Request must contain at least one message.");
        }

        let mut previous: Option<Role> = None;
        for (position, message) in self.messages.iter().enumerate() {
            if message.content.is_empty() {
                return invalid("Message content must not be empty.");
            }
            if message.role == Role::System && position != 0 {
                return invalid("A system message is only allowed at the start.");
            }
            if previous == Some(message.role) {
                return invalid("Messages must alternate between user and assistant.");
            }
            previous = Some(message.role);
        }
        Ok(())
    }
}
