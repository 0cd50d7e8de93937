//! 設定とワークフローテンプレート
//!
//! # 責務
//!
//! - アプリケーション設定 [`AppConfig`]（`stepchain.toml`）の読み込み
//! - ワークフローテンプレート [`WorkflowTemplate`] の読み込みとバリデーション
//! - テンプレートディレクトリの一括読み込み [`TemplateRegistry`]
//!
//! # モジュール構成
//!
//! - `app` - アプリケーション設定
//! - `dto` - TOML デシリアライズ用 DTO（モジュール内部専用）
//! - `step` - テンプレートのステップ定義
//! - `template` - テンプレート定義とレジストリ
//!
//! # 使用例
//!
//! ```rust,no_run
//! use stepchain::config::{AppConfig, TemplateRegistry};
//!
//! let config = AppConfig::from_file("stepchain.toml")?;
//! let templates = TemplateRegistry::load_dir(&config.templates.dir)?;
//! for name in templates.names() {
//!     println!("{name}");
//! }
//! # Ok::<(), stepchain::error::ConfigError>(())
//! ```

pub mod app;
mod dto;
pub mod step;
pub mod template;

// 公開APIの再エクスポート
pub use app::{
    AppConfig, CredentialsConfig, EndpointConfig, LoggingConfig, MemoryConfig, ProvidersConfig,
    ServerConfig, StorageConfig, TemplatesConfig,
};
pub use step::TemplateStep;
pub use template::{TemplateRegistry, WorkflowTemplate};
