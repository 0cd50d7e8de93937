//! プロバイダー呼び出しの監査ログ
//!
//! # 責務
//!
//! - 監査レコード [`InteractionRecord`] の型定義（追記専用・作成後に変更しない）
//! - 監査ログの保存先インターフェース [`AuditSink`]
//! - JSON Lines ファイル実装 [`JsonlAuditSink`] とメモリ実装 [`MemoryAuditSink`]
//! - 一覧取得のページング（新しい順）
//!
//! リレーは `append` の失敗を呼び出し元に伝えません（ログに残して握りつぶします）。

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::error::AuditError;
use crate::relay::CallMetadata;

/// 一覧取得の既定ページサイズ
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// 一覧取得の最大ページサイズ
pub const MAX_PAGE_LIMIT: usize = 100;

/// 監査レコード（プロバイダー呼び出し 1 回分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub workflow_id: Option<String>,
    pub template_name: Option<String>,
    /// `None` はエンジン内部の要約呼び出し
    pub step_index: Option<usize>,
    pub provider: String,
    pub model_id: String,
    /// 正規形リクエストとプロンプトの出所
    pub request_payload: Value,
    /// 上流から受信した生のバイト列（UTF-8 として解釈）。通信前に失敗した場合は `None`
    pub response_payload: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl InteractionRecord {
    /// 呼び出し開始時点の情報から下書きを作る
    pub fn draft(
        metadata: &CallMetadata,
        provider: impl Into<String>,
        model_id: impl Into<String>,
        request_payload: Value,
    ) -> RecordDraft {
        RecordDraft {
            actor: metadata.actor.clone(),
            workflow_id: metadata.workflow_id.clone(),
            template_name: metadata.template_name.clone(),
            step_index: metadata.step_index,
            provider: provider.into(),
            model_id: model_id.into(),
            request_payload,
        }
    }

    /// 一覧表示用の要約
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id,
            timestamp: self.timestamp,
            actor: self.actor.clone(),
            workflow_id: self.workflow_id.clone(),
            template_name: self.template_name.clone(),
            step_index: self.step_index,
            provider: self.provider.clone(),
            model_id: self.model_id.clone(),
            success: self.success,
            error_message: self.error_message.clone(),
        }
    }
}

/// 完了前の監査レコード
#[derive(Debug, Clone)]
pub struct RecordDraft {
    actor: String,
    workflow_id: Option<String>,
    template_name: Option<String>,
    step_index: Option<usize>,
    provider: String,
    model_id: String,
    request_payload: Value,
}

impl RecordDraft {
    /// 成功として確定する
    pub fn succeeded(self, response_payload: String) -> InteractionRecord {
        self.complete(Some(response_payload), None)
    }

    /// 失敗として確定する
    pub fn failed(
        self,
        error_message: impl Into<String>,
        response_payload: Option<String>,
    ) -> InteractionRecord {
        self.complete(response_payload, Some(error_message.into()))
    }

    fn complete(
        self,
        response_payload: Option<String>,
        error_message: Option<String>,
    ) -> InteractionRecord {
        InteractionRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: self.actor,
            workflow_id: self.workflow_id,
            template_name: self.template_name,
            step_index: self.step_index,
            provider: self.provider,
            model_id: self.model_id,
            request_payload: self.request_payload,
            response_payload,
            success: error_message.is_none(),
            error_message,
        }
    }
}

/// 一覧表示用の要約（ペイロードを含まない）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub workflow_id: Option<String>,
    pub template_name: Option<String>,
    pub step_index: Option<usize>,
    pub provider: String,
    pub model_id: String,
    pub success: bool,
    pub error_message: Option<String>,
}

/// 一覧取得の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub logs: Vec<RecordSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

impl RecordPage {
    /// 新しい順に並んだレコードから 1 ページ分を切り出す
    ///
    /// `page` は 1 始まり。`limit` は `1..=MAX_PAGE_LIMIT` に丸めます。
    pub fn slice<'a>(
        newest_first: impl ExactSizeIterator<Item = &'a InteractionRecord>,
        page: usize,
        limit: usize,
    ) -> Self {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let total = newest_first.len();
        let logs = newest_first
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .map(InteractionRecord::summary)
            .collect();

        Self {
            logs,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// 監査ログの保存先
///
/// 追記は 1 レコード単位で原子的に行われる必要があります。
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// レコードを追記する
    async fn append(&self, record: InteractionRecord) -> Result<(), AuditError>;

    /// 新しい順に 1 ページ分を取得する
    async fn list(&self, page: usize, limit: usize) -> Result<RecordPage, AuditError>;

    /// ID でレコードを取得する
    async fn find(&self, id: Uuid) -> Result<Option<InteractionRecord>, AuditError>;
}

/// JSON Lines ファイルへの監査ログ（1 行 = 1 レコード）
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// ファイル全体を読み込む（壊れた行は警告して飛ばす）
    async fn read_all(&self) -> Result<Vec<InteractionRecord>, AuditError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(number, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(path = %self.path.display(), line = number + 1, error = %e, "監査ログの行を読み飛ばしました");
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: InteractionRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list(&self, page: usize, limit: usize) -> Result<RecordPage, AuditError> {
        let records = self.read_all().await?;
        Ok(RecordPage::slice(records.iter().rev(), page, limit))
    }

    async fn find(&self, id: Uuid) -> Result<Option<InteractionRecord>, AuditError> {
        let records = self.read_all().await?;
        Ok(records.into_iter().find(|record| record.id == id))
    }
}

/// メモリ上の監査ログ
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<InteractionRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追記順のスナップショット
    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: InteractionRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    async fn list(&self, page: usize, limit: usize) -> Result<RecordPage, AuditError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(RecordPage::slice(records.iter().rev(), page, limit))
    }

    async fn find(&self, id: Uuid) -> Result<Option<InteractionRecord>, AuditError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().find(|record| record.id == id).cloned())
    }
}
