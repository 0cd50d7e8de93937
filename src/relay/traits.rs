//! リレーの共通インターフェース定義
//!
//! # 使用例
//!
//! ```rust,no_run
//! use stepchain::relay::{Relay, RelayCall, RelayResponse};
//!
//! async fn example(relay: &dyn Relay, call: RelayCall) {
//!     match relay.invoke(call).await.unwrap() {
//!         RelayResponse::Streaming { status, .. } => println!("streaming, HTTP {status}"),
//!         RelayResponse::Buffered { payload, .. } => println!("payload: {payload}"),
//!     }
//! }
//! ```

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use super::{RelayCall, RelayStream, SseDecoder};
use crate::error::RelayError;
use crate::provider::{Provider, extract_message_text};

/// プロバイダー呼び出しの共通インターフェース
///
/// # 実装要件
///
/// - `Send + Sync`: HTTP ハンドラーとエンジンから `Arc<dyn Relay>` で共有される
/// - 1 回の `invoke` につき監査レコードをちょうど 1 件記録する
///
/// # エラー
///
/// - [`RelayError::Configuration`] - 資格情報の欠落、不正なリクエスト（ネットワーク通信前に返る）
/// - [`RelayError::Transport`] - 接続失敗
/// - [`RelayError::Parse`] - 非ストリーミング応答が JSON でない
///
/// 上流の 2xx 以外のステータスはエラーにせず、[`RelayResponse`] の `status` で返します。
#[async_trait]
pub trait Relay: Send + Sync {
    async fn invoke(&self, call: RelayCall) -> Result<RelayResponse, RelayError>;
}

/// リレーの応答
#[derive(Debug)]
pub enum RelayResponse {
    /// 上流のバイト列をそのまま中継するストリーム
    Streaming {
        /// 上流の HTTP ステータス
        status: u16,
        body: RelayStream,
    },

    /// 応答全体を 1 つの値として解釈したもの
    Buffered {
        /// 上流の HTTP ステータス
        status: u16,
        payload: Value,
    },
}

impl RelayResponse {
    /// 上流の HTTP ステータス
    pub fn status(&self) -> u16 {
        match self {
            RelayResponse::Streaming { status, .. } | RelayResponse::Buffered { status, .. } => {
                *status
            }
        }
    }

    /// 上流が 2xx を返したか
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }

    /// 応答を本文テキストに変換する
    ///
    /// - ストリーミング: 増分イベントをデコードし、`provider` のアダプターで取り出した差分を連結する。
    ///   差分ごとに `on_delta` を呼ぶ
    /// - 非ストリーミング: [`extract_message_text`] で本文を取り出す（`on_delta` は呼ばない）
    ///
    /// # エラー
    ///
    /// - 上流が 2xx 以外 → [`RelayError::Upstream`]（ストリームは読まずに破棄する）
    /// - ストリーム途中の通信エラー → そのエラー
    pub async fn into_text(
        self,
        provider: Provider,
        mut on_delta: impl FnMut(&str) + Send,
    ) -> Result<String, RelayError> {
        let status = self.status();
        if !self.is_success() {
            return Err(RelayError::Upstream { status });
        }

        match self {
            RelayResponse::Buffered { payload, .. } => Ok(extract_message_text(&payload)),
            RelayResponse::Streaming { mut body, .. } => {
                let adapter = provider.adapter();
                let mut decoder = SseDecoder::new();
                let mut text = String::new();
                let mut take = |events: Vec<Value>, text: &mut String| {
                    for event in events {
                        let delta = adapter.extract_delta(&event);
                        if !delta.is_empty() {
                            on_delta(&delta);
                            text.push_str(&delta);
                        }
                    }
                };

                while let Some(chunk) = body.next().await {
                    take(decoder.push(&chunk?), &mut text);
                }
                take(decoder.finish(), &mut text);
                Ok(text)
            }
        }
    }
}
