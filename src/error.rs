//! エラー型の定義
//!
//! このモジュールは、stepchain 全体で使用されるエラー型を定義します。
//! ステップ操作全体のエラーは [`ExecutionError`](crate::engine::result::ExecutionError) にまとめられます。

use thiserror::Error;

use crate::engine::context::TransitionError;

/// 設定関連のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// TOML のシリアライズに失敗
    #[error("TOML のシリアライズに失敗しました: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),
}

/// プロバイダー呼び出し（リレー）のエラー
///
/// - `Configuration`: 資格情報の欠落、未知のプロバイダー、不正な要求。リトライしない
/// - `Upstream`: プロバイダーが 2xx 以外を返した
/// - `Transport`: 接続レベルの失敗（拒否・切断・タイムアウト）
/// - `Parse`: レスポンス全体の解釈に失敗
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// 設定エラー
    #[error("{0}")]
    Configuration(String),

    /// 上流エラー
    #[error("HTTP Status {status}")]
    Upstream {
        /// 上流の HTTP ステータスコード
        status: u16,
    },

    /// 通信エラー
    #[error("通信エラー: {0}")]
    Transport(String),

    /// 解析エラー
    #[error("レスポンスの解析に失敗しました: {0}")]
    Parse(String),
}

impl RelayError {
    /// 呼び出し元の入力や設定に起因するエラーかどうか
    pub fn is_configuration(&self) -> bool {
        matches!(self, RelayError::Configuration(_))
    }
}

/// 資格情報ソースのエラー
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("設定ファイルの入出力に失敗しました: {0}")]
    Io(#[from] std::io::Error),

    #[error("設定ファイルの解析に失敗しました: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("設定ファイルの書き出しに失敗しました: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// 監査ログのエラー
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("監査ログの入出力に失敗しました: {0}")]
    Io(#[from] std::io::Error),

    #[error("監査レコードの変換に失敗しました: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// ワークフローストアのエラー
#[derive(Debug, Error)]
pub enum StoreError {
    /// 指定 ID のワークフローが存在しない
    #[error("ワークフローが見つかりません: {0}")]
    NotFound(String),

    #[error("ストアの入出力に失敗しました: {0}")]
    Io(#[from] std::io::Error),

    #[error("ワークフローの変換に失敗しました: {0}")]
    Serde(#[from] serde_json::Error),

    /// 状態遷移が拒否されたため書き込まなかった
    #[error(transparent)]
    Rejected(#[from] TransitionError),
}

/// ログ出力の初期化エラー
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("ログファイルを作成できません: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("ロガーの初期化に失敗しました: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}
