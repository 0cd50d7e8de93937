//! 形式 A: OpenAI Chat Completions（メッセージ配列）
//!
//! ```text
//! { "model": ..., "messages": [ {system}?, ...messages ], "stream": bool }
//! ```
//!
//! 指示文が空でなければ `system` メッセージとして先頭に差し込みます。
//! ストリームイベントの本文は `choices[0].delta.content` にあります。

use serde_json::{Value, json};

use super::traits::text_at;
use super::{CanonicalRequest, ChatMessage, Provider, WireAdapter};

/// OpenAI 形式アダプター
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl WireAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn build_body(&self, request: &CanonicalRequest) -> Value {
        let mut messages: Vec<&ChatMessage> = Vec::with_capacity(request.messages.len() + 1);
        let instruction = request.instruction().map(ChatMessage::system);
        messages.extend(instruction.as_ref());
        messages.extend(request.messages.iter());

        json!({
            "model": request.model_id,
            "messages": messages,
            "stream": request.stream,
        })
    }

    fn auth_headers(&self, credential: &str) -> Vec<(&'static str, String)> {
        vec![("authorization", format!("Bearer {credential}"))]
    }

    fn extract_delta(&self, event: &Value) -> String {
        text_at(event, "/choices/0/delta/content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(instruction: Option<&str>) -> CanonicalRequest {
        CanonicalRequest {
            provider: Provider::OpenAi,
            model_id: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage::user("q1"),
                ChatMessage::assistant("a1"),
                ChatMessage::user("q2"),
            ],
            global_instruction: instruction.map(str::to_string),
            stream: true,
        }
    }

    #[test]
    fn test_body_with_instruction() {
        let body = OpenAiAdapter.build_body(&request(Some("be helpful")));

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], json!({"role": "system", "content": "be helpful"}));
        assert_eq!(messages[3], json!({"role": "user", "content": "q2"}));
    }

    #[test]
    fn test_body_without_instruction() {
        let body = OpenAiAdapter.build_body(&request(Some("")));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_auth_header() {
        let headers = OpenAiAdapter.auth_headers("sk-test");
        assert_eq!(headers, vec![("authorization", "Bearer sk-test".to_string())]);
    }

    #[test]
    fn test_extract_delta() {
        let event = json!({"choices": [{"index": 0, "delta": {"content": "Hel"}}]});
        assert_eq!(OpenAiAdapter.extract_delta(&event), "Hel");

        let role_only = json!({"choices": [{"index": 0, "delta": {"role": "assistant"}}]});
        assert_eq!(OpenAiAdapter.extract_delta(&role_only), "");

        let tool_call = json!({"choices": [{"delta": {"tool_calls": [{"index": 0}]}}]});
        assert_eq!(OpenAiAdapter.extract_delta(&tool_call), "");
    }

    #[test]
    fn test_round_trip_single_chunk() {
        let req = request(None);
        let body = OpenAiAdapter.build_body(&req);
        let intended = body["messages"][2]["content"].as_str().unwrap();

        let chunk = json!({"choices": [{"delta": {"content": intended}}]});
        assert_eq!(OpenAiAdapter.extract_delta(&chunk), "q2");
    }
}
