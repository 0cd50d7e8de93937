//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! - ステップ状態機械: 各ステップの状態遷移を検証し、実行コンテキストを更新する唯一の書き手
//! - 会話メモリ管理: ウィンドウと要約による、再送量が一定のメッセージ列の組み立て
//! - プロバイダー呼び出しは [`Relay`](crate::relay::Relay) を介して抽象的に利用
//!
//! # モジュール構成
//!
//! - [`executor`][]: ステップ操作（生成・再生成・編集・無効化）
//! - [`memory`][]: 会話メモリ管理（ウィンドウ・要約・プロンプト内訳）
//! - [`context`][]: 実行コンテキストと遷移表
//! - [`result`][]: 実行結果型とエラー型
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepchain::config::{AppConfig, TemplateRegistry};
//! use stepchain::engine::WorkflowExecutor;
//! use stepchain::relay::Relay;
//! use stepchain::store::FileStore;
//!
//! async fn run(relay: Arc<dyn Relay>) -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 設定とテンプレートを読み込む
//!     let config = AppConfig::load(None)?;
//!     let templates = TemplateRegistry::load_dir(&config.templates.dir)?;
//!     let template = templates.get("market-research").ok_or("template not found")?;
//!
//!     // 2. Executorを生成
//!     let store = Arc::new(FileStore::new(config.storage.workflows_dir()));
//!     let executor = WorkflowExecutor::new(store, relay, config.memory.window_size);
//!
//!     // 3. ワークフローを作成し、最初のステップを生成
//!     let workflow = executor.create_workflow("alice", "EV market", template).await?;
//!     let outcome = executor.start_step("alice", &workflow.id, 0, "EV batteries").await?;
//!
//!     // 4. 結果を出力
//!     println!("Status: {:?}", outcome.status);
//!     println!("Duration: {} ms", outcome.duration_ms);
//!     println!("{}", outcome.content);
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod executor;
pub mod memory;
pub mod result;

// 公開APIの再エクスポート
pub use context::{ExecutionContext, StepMode, StepResult, StepStatus, TransitionError};
pub use executor::WorkflowExecutor;
pub use memory::{ComposedPrompt, ConversationMemory};
pub use result::{ExecutionError, StepOutcome};
