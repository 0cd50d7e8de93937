//! HTTP インターフェース
//!
//! # 責務
//!
//! - 呼び出し元向けのリレー窓口 `POST /llm/proxy`
//! - ワークフローとステップ操作のエンドポイント
//! - モデルカタログ・テンプレート・API キー設定・監査ログの参照
//!
//! 認証は前段で行われる前提です。呼び出しユーザーは設定されたヘッダー
//! （既定 `x-actor`）から取り出し、無ければ `anonymous` とします。
//!
//! # エンドポイント
//!
//! | メソッド | パス | 内容 |
//! |---------|------|------|
//! | POST | `/llm/proxy` | プロバイダーへの中継 |
//! | GET | `/models` | モデルカタログ（プロバイダー別） |
//! | GET | `/templates`, `/templates/{name}` | テンプレート |
//! | GET, POST | `/workflows` | ワークフロー一覧・作成 |
//! | GET | `/workflows/bookmarked` | ブックマーク一覧 |
//! | GET | `/workflows/{id}` | ワークフロー取得 |
//! | PUT, DELETE | `/workflows/{id}/bookmark` | ブックマーク設定・解除 |
//! | POST | `/workflows/{id}/steps/{index}/{action}` | ステップ操作 |
//! | GET, PUT | `/settings/keys` | API キー（マスク表示・更新） |
//! | GET | `/logs/llm`, `/logs/llm/{id}` | 監査ログ |
//! | GET | `/health` | 死活確認 |
//!
//! エラーは常に `{"message": "..."}` の形で返します。

mod admin;
mod error;
mod proxy;
mod workflows;

pub use error::ApiError;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use tracing::info;

use crate::audit::{AuditSink, JsonlAuditSink};
use crate::config::{AppConfig, TemplateRegistry};
use crate::credentials::{CredentialCache, SettingsFile};
use crate::engine::WorkflowExecutor;
use crate::error::ConfigError;
use crate::relay::{ProxyRelay, Relay};
use crate::store::FileStore;

/// 呼び出しユーザーが不明な場合の名前
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// ハンドラー間で共有する状態
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<dyn Relay>,
    pub executor: Arc<WorkflowExecutor>,
    pub templates: Arc<TemplateRegistry>,
    pub credentials: Arc<CredentialCache>,
    pub audit: Arc<dyn AuditSink>,
    pub actor_header: String,
}

impl AppState {
    /// 設定から各コンポーネントを組み立てる
    ///
    /// 資格情報キャッシュとリレーはここで 1 つだけ生成し、
    /// `/llm/proxy` とエンジン（ステップ生成・要約）で共有します。
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let templates = TemplateRegistry::load_dir(&config.templates.dir)?;

        let source = Arc::new(SettingsFile::new(&config.credentials.settings_file));
        let credentials = Arc::new(CredentialCache::with_ttl(source, config.credentials.ttl()));
        let audit: Arc<dyn AuditSink> =
            Arc::new(JsonlAuditSink::new(config.storage.audit_log()));
        let relay: Arc<dyn Relay> = Arc::new(ProxyRelay::new(
            config.providers.clone(),
            credentials.clone(),
            audit.clone(),
        ));
        let store = Arc::new(FileStore::new(config.storage.workflows_dir()));
        let executor = Arc::new(WorkflowExecutor::new(
            store,
            relay.clone(),
            config.memory.window_size,
        ));

        info!(
            templates = templates.len(),
            data_dir = %config.storage.data_dir.display(),
            window_size = config.memory.window_size,
            "アプリケーション状態を初期化しました"
        );
        Ok(Self {
            relay,
            executor,
            templates: Arc::new(templates),
            credentials,
            audit,
            actor_header: config.server.actor_header.clone(),
        })
    }

    /// リクエストヘッダーから呼び出しユーザーを取り出す
    pub fn actor(&self, headers: &HeaderMap) -> String {
        headers
            .get(self.actor_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(ANONYMOUS_ACTOR)
            .to_string()
    }
}

/// ルーターを組み立てる
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/llm/proxy", post(proxy::relay))
        .route("/models", get(admin::models))
        .route("/templates", get(admin::templates))
        .route("/templates/{name}", get(admin::template))
        .route(
            "/settings/keys",
            get(admin::get_keys).put(admin::put_keys),
        )
        .route("/logs/llm", get(admin::list_logs))
        .route("/logs/llm/{id}", get(admin::get_log))
        .route(
            "/workflows",
            get(workflows::list).post(workflows::create),
        )
        .route("/workflows/bookmarked", get(workflows::bookmarked))
        .route("/workflows/{id}", get(workflows::get))
        .route(
            "/workflows/{id}/bookmark",
            put(workflows::bookmark).delete(workflows::unbookmark),
        )
        .route(
            "/workflows/{id}/steps/{index}/{action}",
            post(workflows::step_action),
        )
        .with_state(state)
}

/// 設定されたアドレスで待ち受ける
pub async fn serve(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::from_config(config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, "HTTP サーバーを起動しました");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
