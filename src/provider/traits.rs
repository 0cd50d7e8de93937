//! ワイヤー形式アダプターの共通インターフェース定義
//!
//! # 責務
//!
//! - プロバイダー形式ごとの変換トレイト [`WireAdapter`] を定義
//! - 1 回のリレー呼び出しで使い捨てるワイヤーリクエスト [`WireRequest`] を提供
//! - 非ストリーミング応答からのテキスト抽出 [`extract_message_text`] を提供
//!
//! # 実装方式
//!
//! アダプターは純粋関数の集まりです。ネットワーク・ファイル・時刻に一切触れないため、
//! テストは JSON の入出力を比較するだけで完結します。

use reqwest::Url;
use serde_json::Value;

use super::{CanonicalRequest, Provider};
use crate::error::RelayError;

/// プロバイダーへ送るリクエスト一式
///
/// 永続化されることはなく、1 回のリレー呼び出しの間だけ存在します。
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// 送信先 URL（クエリパラメーター込み）
    pub url: Url,

    /// 認証などの追加ヘッダー（`Content-Type` は送信側で付与）
    pub headers: Vec<(&'static str, String)>,

    /// JSON ボディ
    pub body: Value,
}

/// ワイヤー形式アダプター
///
/// # 実装要件
///
/// - `Send + Sync`: `'static` な参照として複数タスクから共有される
/// - すべてのメソッドが副作用を持たないこと
pub trait WireAdapter: Send + Sync {
    /// 対応するプロバイダー
    fn provider(&self) -> Provider;

    /// 正規形リクエストからプロバイダー固有の JSON ボディを組み立てる
    fn build_body(&self, request: &CanonicalRequest) -> Value;

    /// 送信先 URL を決定する
    ///
    /// 既定では `base_url` と `path` を連結するだけです。
    fn endpoint(
        &self,
        base_url: &str,
        path: &str,
        _request: &CanonicalRequest,
        _credential: &str,
    ) -> Result<Url, RelayError> {
        join_url(base_url, path)
    }

    /// 認証ヘッダー
    fn auth_headers(&self, credential: &str) -> Vec<(&'static str, String)>;

    /// デコード済みのストリームイベント 1 件から増分テキストを取り出す
    ///
    /// 本文を含まないイベント（ping、ツール呼び出し、終了通知など）では空文字列を返します。
    fn extract_delta(&self, event: &Value) -> String;

    /// ワイヤーリクエスト一式を組み立てる
    fn build(
        &self,
        request: &CanonicalRequest,
        base_url: &str,
        path: &str,
        credential: &str,
    ) -> Result<WireRequest, RelayError> {
        Ok(WireRequest {
            url: self.endpoint(base_url, path, request, credential)?,
            headers: self.auth_headers(credential),
            body: self.build_body(request),
        })
    }
}

/// `base_url` と `path` を連結して URL を作る
pub(crate) fn join_url(base_url: &str, path: &str) -> Result<Url, RelayError> {
    let path = path.trim();
    let joined = if path.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), path)
    };
    Url::parse(&joined)
        .map_err(|e| RelayError::Configuration(format!("Invalid endpoint URL {joined}: {e}")))
}

/// JSON ポインターが指す文字列（なければ空文字列）
pub(crate) fn text_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// 非ストリーミング応答から本文テキストを取り出す
///
/// 次の順に探し、最初に見つかった空でない値を返します。
///
/// 1. `choices[0].message.content`（形式 A）
/// 2. `candidates[0].content.parts[0].text`（形式 B）
/// 3. `content[0].text`（形式 C）
///
/// 形式 B の `streamGenerateContent` は SSE 指定なしだとチャンクの JSON 配列を返すため、
/// 配列の場合は各要素の抽出結果を連結します。
pub fn extract_message_text(payload: &Value) -> String {
    if let Value::Array(items) = payload {
        return items.iter().map(extract_message_text).collect();
    }

    [
        "/choices/0/message/content",
        "/candidates/0/content/parts/0/text",
        "/content/0/text",
    ]
    .into_iter()
    .map(|pointer| text_at(payload, pointer))
    .find(|text| !text.is_empty())
    .unwrap_or_default()
}
