//! 形式 B: Google Gemini（ロール写像）
//!
//! ```text
//! POST {base}{path/{modelId}}?key=<credential>[&alt=sse]
//! { "contents": [ { "role": "user" | "model", "parts": [ { "text": ... } ] } ],
//!   "system_instruction": { "parts": [ { "text": ... } ] } }
//! ```
//!
//! 指示文は `messages` に混ぜず、必ず `system_instruction` に置きます。
//! 資格情報は URL のクエリに入るため、この URL をログに出してはいけません。

use reqwest::Url;
use serde_json::{Value, json};

use super::traits::{join_url, text_at};
use super::{CanonicalRequest, Provider, Role, WireAdapter};
use crate::error::RelayError;

/// パステンプレート中のモデル ID プレースホルダー
const MODEL_PLACEHOLDER: &str = "{modelId}";

/// Google 形式アダプター
#[derive(Debug, Clone, Copy, Default)]
pub struct GoogleAdapter;

impl WireAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn build_body(&self, request: &CanonicalRequest) -> Value {
        let contents: Vec<Value> = request
            .conversation()
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                };
                json!({ "role": role, "parts": [{ "text": message.content }] })
            })
            .collect();

        let mut body = json!({ "contents": contents });
        if let Some(instruction) = request.combined_instruction() {
            body["system_instruction"] = json!({ "parts": [{ "text": instruction }] });
        }
        body
    }

    fn endpoint(
        &self,
        base_url: &str,
        path: &str,
        request: &CanonicalRequest,
        credential: &str,
    ) -> Result<Url, RelayError> {
        let path = path.replace(MODEL_PLACEHOLDER, &request.model_id);
        let mut url = join_url(base_url, &path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", credential);
            if request.stream {
                query.append_pair("alt", "sse");
            }
        }
        Ok(url)
    }

    fn auth_headers(&self, _credential: &str) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn extract_delta(&self, event: &Value) -> String {
        text_at(event, "/candidates/0/content/parts/0/text")
    }
}
