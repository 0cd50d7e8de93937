//! アプリケーション設定
//!
//! すべてのセクションは省略可能で、省略時は既定値が使われます。
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:3000"
//! actor_header = "x-actor"
//!
//! [memory]
//! window_size = 2
//!
//! [providers.openai]
//! base_url = "https://api.openai.com"
//!
//! [credentials]
//! settings_file = "data/settings.toml"
//! ttl_secs = 300
//!
//! [storage]
//! data_dir = "data"
//!
//! [templates]
//! dir = "templates"
//!
//! [logging]
//! level = "info"
//! directory = "logs"
//! json = false
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::memory::DEFAULT_WINDOW_SIZE;
use crate::error::ConfigError;
use crate::provider::Provider;

/// 設定ファイルの既定パス
pub const DEFAULT_CONFIG_PATH: &str = "stepchain.toml";

/// アプリケーション設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub memory: MemoryConfig,
    pub providers: ProvidersConfig,
    pub credentials: CredentialsConfig,
    pub storage: StorageConfig,
    pub templates: TemplatesConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// TOML ファイルから読み込む
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// TOML 文字列から読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// 設定ファイルを読み込む
    ///
    /// パスが指定されていればそのファイルを必須とし、
    /// 指定が無ければ [`DEFAULT_CONFIG_PATH`] を探して、無ければ既定値を使います。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    /// 値の整合性を検証する
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.window_size == 0 {
            return Err(ConfigError::Validation(
                "memory.window_size は 1 以上である必要があります".to_string(),
            ));
        }
        self.server.listen.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Validation(format!("server.listen が不正です ({}): {e}", self.server.listen))
        })?;
        if self.server.actor_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.actor_header が空です".to_string(),
            ));
        }
        for provider in Provider::ALL {
            let base_url = self.providers.base_url(provider);
            reqwest::Url::parse(base_url).map_err(|e| {
                ConfigError::Validation(format!("{provider} の base_url が不正です ({base_url}): {e}"))
            })?;
        }
        Ok(())
    }
}

/// HTTP サーバー設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 待ち受けアドレス
    pub listen: String,
    /// 呼び出しユーザーを伝えるヘッダー名（認証は前段で行う）
    pub actor_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            actor_header: "x-actor".to_string(),
        }
    }
}

/// 会話メモリ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// そのまま再送する直近のステップ数
    pub window_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// プロバイダーごとの接続先
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: EndpointConfig,
    pub google: EndpointConfig,
    pub anthropic: EndpointConfig,
}

/// 接続先
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
}

impl EndpointConfig {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: EndpointConfig::new("https://api.openai.com"),
            google: EndpointConfig::new("https://generativelanguage.googleapis.com"),
            anthropic: EndpointConfig::new("https://api.anthropic.com"),
        }
    }
}

impl ProvidersConfig {
    /// すべてのプロバイダーを同じ接続先に向ける（ローカルの模擬サーバーなど）
    pub fn all_at(base_url: &str) -> Self {
        Self {
            openai: EndpointConfig::new(base_url),
            google: EndpointConfig::new(base_url),
            anthropic: EndpointConfig::new(base_url),
        }
    }

    pub fn base_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai.base_url,
            Provider::Google => &self.google.base_url,
            Provider::Anthropic => &self.anthropic.base_url,
        }
    }
}

/// API キー設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// API キーを保存する TOML ファイル
    pub settings_file: PathBuf,
    /// キャッシュの有効期間（秒）
    pub ttl_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            settings_file: PathBuf::from("data/settings.toml"),
            ttl_secs: 300,
        }
    }
}

impl CredentialsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 永続化設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// ワークフローと監査ログを置くディレクトリ
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn workflows_dir(&self) -> PathBuf {
        self.data_dir.join("workflows")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.data_dir.join("interactions.jsonl")
    }
}

/// テンプレート設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub dir: PathBuf,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates"),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 既定のログレベル（`RUST_LOG` が優先）
    pub level: String,
    /// ファイル出力先。省略時はコンソールのみ
    pub directory: Option<PathBuf>,
    /// ファイル出力を JSON 形式にするか
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}
