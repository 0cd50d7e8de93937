//! stepchain - LLM 駆動のマルチステップワークフロー実行コア
//!
//! # モジュール構成
//!
//! - [`config`][]: アプリケーション設定とワークフローテンプレート（TOML）
//! - [`provider`][]: プロバイダー差異を吸収するワイヤー形式アダプター
//! - [`relay`][]: プロバイダーへのプロキシリレー（ストリーム中継と監査記録）
//! - [`credentials`][]: API キーの解決とキャッシュ
//! - [`audit`][]: プロバイダー呼び出しの監査ログ
//! - [`store`][]: ワークフローと実行コンテキストの永続化
//! - [`engine`][]: ステップ状態機械と会話メモリ管理
//! - [`server`][]: HTTP インターフェース
//! - [`telemetry`][]: ログ出力の初期化
//!
//! # 処理の流れ
//!
//! ```text
//! ステップ生成要求
//!   → WorkflowExecutor（状態遷移・永続化）
//!   → ConversationMemory（ウィンドウ + 要約でメッセージ列を構築）
//!   → ProxyRelay（資格情報解決・中継・監査記録）
//!   → WireAdapter（正規形 ⇄ プロバイダー固有形式）
//! ```

pub mod audit;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod provider;
pub mod relay;
pub mod server;
pub mod store;
pub mod telemetry;
