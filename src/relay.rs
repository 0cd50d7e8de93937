//! プロキシリレー
//!
//! # 責務
//!
//! - プロバイダーへの送信（資格情報の解決、ワイヤーリクエストの送信）
//! - ストリーミング時、受信したバイト列を順序どおり・無加工で呼び出し元へ中継
//! - 中継と同時に全バイトを蓄積し、完了時に監査レコードを 1 件だけ記録
//! - 非ストリーミング時、応答全体を 1 つの JSON 値として返却
//!
//! # モジュール構成
//!
//! - `traits` - [`Relay`] トレイトと [`RelayResponse`]
//! - `request` - 呼び出し元向けリクエスト [`RelayRequest`] と内部呼び出し [`RelayCall`]
//! - `proxy` - HTTP 実装 [`ProxyRelay`]
//! - `stream` - 中継ストリーム [`RelayStream`]
//! - `sse` - 増分イベントのデコーダー [`SseDecoder`]
//!
//! # 呼び出し元
//!
//! リレーの利用者は 2 つです。HTTP の `/llm/proxy`（[`crate::server`]）と、
//! ステップ生成・要約を行うエンジン（[`crate::engine`]）です。
//! どちらも同じ [`Relay`] 実装を共有します。

pub mod proxy;
pub mod request;
pub mod sse;
pub mod stream;
pub mod traits;

// 公開APIの再エクスポート
pub use proxy::ProxyRelay;
pub use request::{ApiConfig, CallMetadata, RelayBody, RelayCall, RelayRequest};
pub use sse::SseDecoder;
pub use stream::RelayStream;
pub use traits::{Relay, RelayResponse};
