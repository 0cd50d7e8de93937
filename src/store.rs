//! ワークフローと実行コンテキストの永続化
//!
//! # 責務
//!
//! - ワークフローのレコード [`Workflow`] の定義（テンプレートのスナップショットを値として保持）
//! - 実行コンテキストの読み出しと全体置換を行う [`WorkflowStore`] トレイト
//! - 組み込み実装: [`InMemoryStore`]（テスト・一時利用）と [`FileStore`]（1 ワークフロー = 1 JSON ファイル）
//!
//! # 同時実行
//!
//! 書き込みは部分更新を持たず、常にコンテキスト全体を置き換えます。
//! [`WorkflowStore::update`] の既定実装は単純な read-modify-write（後勝ち）ですが、
//! 組み込み実装はプロセス内で原子的に適用するため、同じステップの同時開始は片方だけが成功します。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WorkflowTemplate;
use crate::engine::context::{ExecutionContext, TransitionError};
use crate::error::StoreError;

/// 実行コンテキストへの変更（検証付き）
///
/// 変更が `Err` を返した場合、ストアには何も書き込まれません。
pub type ContextMutation =
    Box<dyn FnOnce(&mut ExecutionContext) -> Result<(), TransitionError> + Send>;

/// ワークフロー 1 件分のレコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// 作成時点のテンプレートのコピー。元テンプレートの変更は反映されない
    pub template_snapshot: WorkflowTemplate,
    pub execution_context: ExecutionContext,
    #[serde(default)]
    pub is_bookmarked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// テンプレートのステップ数で初期化したワークフローを生成
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        template: WorkflowTemplate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            execution_context: ExecutionContext::new(template.steps().len()),
            template_snapshot: template,
            is_bookmarked: false,
            bookmark_title: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 一覧表示用の要約
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            template_name: self.template_snapshot.name().to_string(),
            current_step_index: self.execution_context.current_step_index(),
            step_count: self.execution_context.len(),
            is_bookmarked: self.is_bookmarked,
            bookmark_title: self.bookmark_title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// ワークフロー一覧の 1 行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub title: String,
    pub template_name: String,
    pub current_step_index: usize,
    pub step_count: usize,
    pub is_bookmarked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// ワークフローの保存先
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// 新しいワークフローを保存する
    async fn insert(&self, workflow: Workflow) -> Result<(), StoreError>;

    /// ワークフロー全体を取得する
    async fn workflow(&self, id: &str) -> Result<Workflow, StoreError>;

    /// ユーザーのワークフローを更新日時の新しい順で返す
    async fn list(&self, user_id: &str) -> Result<Vec<Workflow>, StoreError>;

    /// ブックマークを設定（`Some`）または解除（`None`）する
    async fn set_bookmark(&self, id: &str, title: Option<String>)
    -> Result<Workflow, StoreError>;

    /// 実行コンテキスト全体を置き換える
    async fn replace(&self, id: &str, context: ExecutionContext) -> Result<(), StoreError>;

    /// 実行コンテキストを取得する
    async fn get(&self, id: &str) -> Result<ExecutionContext, StoreError> {
        Ok(self.workflow(id).await?.execution_context)
    }

    /// ブックマーク済みのワークフロー
    async fn bookmarked(&self, user_id: &str) -> Result<Vec<Workflow>, StoreError> {
        let mut workflows = self.list(user_id).await?;
        workflows.retain(|workflow| workflow.is_bookmarked);
        Ok(workflows)
    }

    /// 読み出し → 変更 → 置換
    ///
    /// 既定実装は原子的ではありません（後勝ち）。
    async fn update(
        &self,
        id: &str,
        mutation: ContextMutation,
    ) -> Result<ExecutionContext, StoreError> {
        let mut context = self.get(id).await?;
        mutation(&mut context)?;
        self.replace(id, context.clone()).await?;
        Ok(context)
    }
}

fn newest_first(mut workflows: Vec<Workflow>) -> Vec<Workflow> {
    workflows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    workflows
}

/// メモリ上のストア
#[derive(Debug, Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert(&self, workflow: Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Workflow>, StoreError> {
        let workflows = self
            .workflows
            .read()
            .await
            .values()
            .filter(|workflow| workflow.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(workflows))
    }

    async fn set_bookmark(
        &self,
        id: &str,
        title: Option<String>,
    ) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        workflow.is_bookmarked = title.is_some();
        workflow.bookmark_title = title;
        workflow.touch();
        Ok(workflow.clone())
    }

    async fn replace(&self, id: &str, context: ExecutionContext) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        workflow.execution_context = context;
        workflow.touch();
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        mutation: ContextMutation,
    ) -> Result<ExecutionContext, StoreError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut context = workflow.execution_context.clone();
        mutation(&mut context)?;
        workflow.execution_context = context.clone();
        workflow.touch();
        Ok(context)
    }
}

/// ディレクトリ上のストア（`<dir>/<id>.json`）
///
/// 書き込みは一時ファイルへの書き出しとリネームで行うため、
/// 途中で停止しても壊れたファイルは残りません。
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// ID をファイルパスに変換する。ディレクトリ外を指す ID は存在しないものとして扱う
    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, id: &str) -> Result<Workflow, StoreError> {
        let path = self.path_for(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let path = self.path_for(&workflow.id)?;
        let json = serde_json::to_vec_pretty(workflow)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// 書き込みロックを保持したまま読み出し → 変更 → 書き込みを行う
    async fn modify<T: Send>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Workflow) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut workflow = self.read(id).await?;
        let value = apply(&mut workflow)?;
        workflow.touch();
        self.write(&workflow).await?;
        Ok(value)
    }
}

#[async_trait]
impl WorkflowStore for FileStore {
    async fn insert(&self, workflow: Workflow) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(&workflow).await?;
        info!(workflow_id = %workflow.id, "ワークフローを保存しました");
        Ok(())
    }

    async fn workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        self.read(id).await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Workflow>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut workflows = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Workflow>(&bytes) {
                Ok(workflow) if workflow.user_id == user_id => workflows.push(workflow),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ワークフローファイルを読み飛ばしました");
                }
            }
        }
        Ok(newest_first(workflows))
    }

    async fn set_bookmark(
        &self,
        id: &str,
        title: Option<String>,
    ) -> Result<Workflow, StoreError> {
        self.modify(id, |workflow| {
            workflow.is_bookmarked = title.is_some();
            workflow.bookmark_title = title;
            Ok(())
        })
        .await?;
        self.read(id).await
    }

    async fn replace(&self, id: &str, context: ExecutionContext) -> Result<(), StoreError> {
        self.modify(id, |workflow| {
            workflow.execution_context = context;
            Ok(())
        })
        .await
    }

    async fn update(
        &self,
        id: &str,
        mutation: ContextMutation,
    ) -> Result<ExecutionContext, StoreError> {
        self.modify(id, |workflow| {
            let mut context = workflow.execution_context.clone();
            mutation(&mut context)?;
            workflow.execution_context = context.clone();
            Ok(context)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowTemplate;
    use crate::engine::context::StepStatus;

    fn template() -> WorkflowTemplate {
        WorkflowTemplate::from_toml(
            "name = \"t\"\nmodel = \"OpenAI__gpt-4o\"\n[[steps]]\nname = \"a\"\n[[steps]]\nname = \"b\"\n",
        )
        .unwrap()
    }

    async fn exercise(store: &dyn WorkflowStore) {
        let workflow = Workflow::new("alice", "first", template());
        let id = workflow.id.clone();
        store.insert(workflow).await.unwrap();
        store
            .insert(Workflow::new("bob", "other", template()))
            .await
            .unwrap();

        let context = store.get(&id).await.unwrap();
        assert_eq!(context.len(), 2);

        let updated = store
            .update(&id, Box::new(|ctx| ctx.begin_generation(0, "hello")))
            .await
            .unwrap();
        assert_eq!(updated.step(0).unwrap().status, StepStatus::Generating);

        let rejected = store
            .update(&id, Box::new(|ctx| ctx.begin_generation(0, "again")))
            .await
            .unwrap_err();
        assert!(matches!(rejected, StoreError::Rejected(_)));
        assert_eq!(
            store.get(&id).await.unwrap().step(0).unwrap().user_input,
            "hello"
        );

        let mut replaced = ExecutionContext::new(2);
        replaced.record_summary(0, "s");
        store.replace(&id, replaced.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), replaced);

        let listed = store.list("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "first");

        assert!(store.bookmarked("alice").await.unwrap().is_empty());
        let bookmarked = store
            .set_bookmark(&id, Some("keep".to_string()))
            .await
            .unwrap();
        assert!(bookmarked.is_bookmarked);
        assert_eq!(store.bookmarked("alice").await.unwrap().len(), 1);
        store.set_bookmark(&id, None).await.unwrap();
        assert!(store.bookmarked("alice").await.unwrap().is_empty());

        assert!(matches!(
            store.get("missing").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.replace("missing", ExecutionContext::new(1)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        exercise(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileStore::new(dir.path().join("workflows"))).await;
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow::new("alice", "persisted", template());
        let id = workflow.id.clone();
        FileStore::new(dir.path()).insert(workflow.clone()).await.unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.workflow(&id).await.unwrap(), workflow);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.workflow("../secret").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = InMemoryStore::new();
        let older = Workflow::new("alice", "older", template());
        let newer = Workflow::new("alice", "newer", template());
        let older_id = older.id.clone();
        store.insert(older).await.unwrap();
        store.insert(newer).await.unwrap();

        store.replace(&older_id, ExecutionContext::new(2)).await.unwrap();
        let titles: Vec<_> = store
            .list("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.title)
            .collect();
        assert_eq!(titles, vec!["older", "newer"]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let template = template();
        let workflow = Workflow::new("alice", "t", template.clone());
        let json = serde_json::to_value(&workflow).unwrap();
        assert_eq!(json["template_snapshot"]["name"], "t");
        assert_eq!(json["execution_context"]["currentStepIndex"], 0);
        assert_eq!(workflow.summary().step_count, 2);
    }
}
