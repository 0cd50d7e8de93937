//! 会話メモリ管理
//!
//! # 責務
//!
//! ステップ `i` に送るメッセージ列を、履歴の再送量が一定に収まるように組み立てます。
//!
//! - 直近 `W` ステップ（ウィンドウ）の入出力はそのまま再送
//! - それより古いステップ `[0, i - W]` は要約 1 つに置き換える
//! - 要約はリレーへの内部呼び出し（非ストリーミング）で生成する
//!
//! # メッセージ列
//!
//! ```text
//! [user]      --- Previous conversation summary --- ... （要約がある場合）
//! [user]      ステップ i-W の入力
//! [assistant] ステップ i-W の出力
//! ...
//! [user]      trim(prompt + "\n\n" + 入力)
//! ```
//!
//! 同じロールが連続する場合は空行でつないで 1 つにまとめます。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepchain::engine::memory::ConversationMemory;
//! use stepchain::relay::Relay;
//!
//! fn build(relay: Arc<dyn Relay>) -> ConversationMemory {
//!     ConversationMemory::new(relay, 2)
//! }
//! ```

use std::ops::RangeInclusive;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::WorkflowTemplate;
use crate::engine::context::ExecutionContext;
use crate::error::RelayError;
use crate::provider::{CanonicalRequest, ChatMessage, ModelSpec, Role};
use crate::relay::{CallMetadata, Relay, RelayCall};

/// 既定のウィンドウサイズ
pub const DEFAULT_WINDOW_SIZE: usize = 2;

/// 要約呼び出しのシステム指示
pub const SUMMARY_INSTRUCTION: &str = "You are a helpful assistant that summarizes conversations.";

/// 要約プロンプトの先頭
const SUMMARY_PROMPT_PREFIX: &str =
    "summarize: Condense the following conversation into its key points.\n\n";

/// `promptDetails.variables` でユーザー入力を表すキー
pub const USER_INPUT_VARIABLE: &str = "[current step user input]";

/// 要約を再送するときの前置き
pub fn summary_preamble(summary: &str) -> String {
    format!("--- Previous conversation summary ---\n{summary}\n--- End of summary ---")
}

/// 組み立て済みのステップ入力
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    /// プロバイダーへ送るメッセージ列（最後が現在のプロンプト）
    pub messages: Vec<ChatMessage>,
    /// `trim(prompt + "\n\n" + 入力)`
    pub final_user_prompt: String,
    /// 監査用のプロンプト内訳
    pub prompt_details: Value,
}

/// 会話メモリ管理
pub struct ConversationMemory {
    relay: Arc<dyn Relay>,
    window_size: usize,
}

impl ConversationMemory {
    /// `window_size` は 1 以上に切り上げられます
    pub fn new(relay: Arc<dyn Relay>, window_size: usize) -> Self {
        Self {
            relay,
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// ステップ `index` の前に要約すべき範囲（`index < W` なら `None`）
    pub fn summary_range(&self, index: usize) -> Option<RangeInclusive<usize>> {
        index.checked_sub(self.window_size).map(|through| 0..=through)
    }

    /// そのまま再送するステップの範囲 `[max(0, i - W), i)`
    pub fn window_range(&self, index: usize) -> std::ops::Range<usize> {
        index.saturating_sub(self.window_size)..index
    }

    /// 要約の再生成が必要なら、その終端を返す
    ///
    /// 同じ範囲の要約がすでに記録されていれば `None` です（リトライで再計算しない）。
    pub fn pending_summary(&self, context: &ExecutionContext, index: usize) -> Option<usize> {
        let through = *self.summary_range(index)?.end();
        (context.summary_through() != Some(through)).then_some(through)
    }

    /// ステップ `[0, through]` を要約する
    ///
    /// 範囲内のステップがすべて空なら呼び出しを行わず `Ok(None)` を返します。
    /// 要約にはテンプレートの既定モデルを使い、`step_index` は記録しません。
    pub async fn summarize(
        &self,
        template: &WorkflowTemplate,
        context: &ExecutionContext,
        through: usize,
        metadata: CallMetadata,
    ) -> Result<Option<String>, RelayError> {
        let entries = summary_entries(context, through);
        if entries.is_empty() {
            debug!(through, "要約対象が空のため要約をスキップします");
            return Ok(None);
        }

        let model = template.default_model().ok_or_else(|| {
            RelayError::Configuration(format!(
                "Model configuration ({}) was not found.",
                template.model()
            ))
        })?;
        let call = summary_call(template, model, &entries, metadata);

        info!(
            template = template.name(),
            through,
            provider = %model.provider,
            model_id = model.model_id,
            "会話の要約を生成します"
        );
        let text = self.relay.invoke(call).await?.into_text(model.provider, |_| {}).await?;
        Ok(Some(text))
    }

    /// ステップ `index` のメッセージ列とプロンプト内訳を組み立てる
    pub fn compose(
        &self,
        template: &WorkflowTemplate,
        context: &ExecutionContext,
        index: usize,
        user_input: &str,
    ) -> ComposedPrompt {
        let mut messages = Vec::new();
        let summary = context.summary();
        if !summary.is_empty() {
            push_merged(&mut messages, ChatMessage::user(summary_preamble(summary)));
        }

        for result in &context.results()[self.window_range(index.min(context.len()))] {
            if !result.user_input.is_empty() {
                push_merged(&mut messages, ChatMessage::user(result.user_input.as_str()));
            }
            if !result.content.is_empty() {
                push_merged(&mut messages, ChatMessage::assistant(result.content.as_str()));
            }
        }

        let step = template.step(index);
        let final_user_prompt = step
            .map(|step| step.final_prompt(user_input))
            .unwrap_or_else(|| user_input.trim().to_string());
        let history = format_history(&messages);
        push_merged(&mut messages, ChatMessage::user(final_user_prompt.as_str()));

        let template_prompt = step
            .map(|step| step.prompt())
            .filter(|prompt| !prompt.is_empty())
            .unwrap_or("N/A");
        let prompt_details = json!({
            "template": template_prompt,
            "summary": summary,
            "history": history,
            "variables": { USER_INPUT_VARIABLE: user_input },
            "finalUserPrompt": final_user_prompt,
        });

        ComposedPrompt {
            messages,
            final_user_prompt,
            prompt_details,
        }
    }
}

/// 要約対象の発話（空の入出力は除く）
fn summary_entries(context: &ExecutionContext, through: usize) -> Vec<ChatMessage> {
    let end = (through + 1).min(context.len());
    let mut entries = Vec::new();
    for result in &context.results()[..end] {
        if !result.user_input.is_empty() {
            entries.push(ChatMessage::user(result.user_input.as_str()));
        }
        if !result.content.is_empty() {
            entries.push(ChatMessage::assistant(result.content.as_str()));
        }
    }
    entries
}

fn summary_call(
    template: &WorkflowTemplate,
    model: &ModelSpec,
    entries: &[ChatMessage],
    metadata: CallMetadata,
) -> RelayCall {
    let lines: Vec<String> = entries
        .iter()
        .map(|entry| format!("[{}]: {}", entry.role.as_str(), entry.content))
        .collect();
    let prompt = format!("{SUMMARY_PROMPT_PREFIX}{}", lines.join("\n"));

    RelayCall {
        request: CanonicalRequest {
            provider: model.provider,
            model_id: model.model_id.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            global_instruction: Some(SUMMARY_INSTRUCTION.to_string()),
            stream: false,
        },
        path: model.api.path.to_string(),
        metadata: CallMetadata {
            template_name: Some(format!("[summary] {}", template.name())),
            step_index: None,
            prompt_details: None,
            ..metadata
        },
    }
}

/// 直前と同じロールなら空行でつなぐ
fn push_merged(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    match messages.last_mut() {
        Some(last) if last.role == message.role => {
            last.content.push_str("\n\n");
            last.content.push_str(&message.content);
        }
        _ => messages.push(message),
    }
}

fn format_history(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "SYSTEM",
                Role::User => "USER",
                Role::Assistant => "ASSISTANT",
            };
            format!("[{role}]\n{}", message.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
