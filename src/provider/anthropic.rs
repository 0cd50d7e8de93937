//! 形式 C: Anthropic Messages（システムプロンプト）
//!
//! ```text
//! { "model": ..., "messages": [...], "max_tokens": 4096, "stream": bool, "system": ...? }
//! ```
//!
//! `messages` には `system` を含めず、指示文はトップレベルの `system` に置きます。
//! ストリームでは `type == "content_block_delta"` のイベントだけが本文（`delta.text`）を運びます。

use serde_json::{Value, json};

use super::traits::text_at;
use super::{CanonicalRequest, Provider, WireAdapter};

/// 1 回の応答で生成する最大トークン数
pub const MAX_TOKENS: u32 = 4096;

/// `anthropic-version` ヘッダーの値
pub const API_VERSION: &str = "2023-06-01";

/// Anthropic 形式アダプター
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl WireAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn build_body(&self, request: &CanonicalRequest) -> Value {
        let mut body = json!({
            "model": request.model_id,
            "messages": request.conversation(),
            "max_tokens": MAX_TOKENS,
            "stream": request.stream,
        });
        if let Some(system) = request.combined_instruction() {
            body["system"] = Value::String(system);
        }
        body
    }

    fn auth_headers(&self, credential: &str) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", credential.to_string()),
            ("anthropic-version", API_VERSION.to_string()),
        ]
    }

    fn extract_delta(&self, event: &Value) -> String {
        if event.get("type").and_then(Value::as_str) != Some("content_block_delta") {
            return String::new();
        }
        text_at(event, "/delta/text")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            provider: Provider::Anthropic,
            model_id: "claude-sonnet-4-20250514".to_string(),
            messages: vec![ChatMessage::user("Hello world")],
            global_instruction: Some("be kind".to_string()),
            stream: false,
        }
    }

    #[test]
    fn test_body_shape() {
        let body = AnthropicAdapter.build_body(&request());

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stream"], false);
        assert_eq!(body["system"], "be kind");
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": "Hello world"}])
        );
    }

    #[test]
    fn test_system_never_inlined() {
        let mut req = request();
        req.global_instruction = None;
        req.messages.insert(0, ChatMessage::system("rules"));
        let body = AnthropicAdapter.build_body(&req);

        assert_eq!(body["system"], "rules");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_no_system_field_without_instruction() {
        let mut req = request();
        req.global_instruction = None;
        assert!(AnthropicAdapter.build_body(&req).get("system").is_none());
    }

    #[test]
    fn test_auth_headers() {
        let headers = AnthropicAdapter.auth_headers("sk-ant");
        assert!(headers.contains(&("x-api-key", "sk-ant".to_string())));
        assert!(headers.contains(&("anthropic-version", "2023-06-01".to_string())));
    }

    #[test]
    fn test_extract_delta_gated_on_event_type() {
        let delta = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "orld"}
        });
        assert_eq!(AnthropicAdapter.extract_delta(&delta), "orld");

        let ping = json!({"type": "ping"});
        assert_eq!(AnthropicAdapter.extract_delta(&ping), "");

        let stop = json!({"type": "message_delta", "delta": {"text": "ignored"}});
        assert_eq!(AnthropicAdapter.extract_delta(&stop), "");
    }
}
