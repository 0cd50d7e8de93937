//! ステップ状態機械の実行エンジン
//!
//! # 責務
//!
//! このモジュールは、ワークフローの各ステップの生成・編集・無効化を行う [`WorkflowExecutor`] を提供します。
//! 実行コンテキストへの書き込みはすべてこのエグゼキューターを経由し、
//! 遷移表（[`ExecutionContext`] のメソッド）で検証してからストアへ保存します。
//!
//! # ステップ生成の流れ
//!
//! 1. `pending → generating` を保存（ネットワーク通信の前に永続化する）
//! 2. ウィンドウ外のステップがあれば要約を生成し、保存してから次へ進む
//! 3. 会話メモリでメッセージ列を組み立てる
//! 4. リレーを呼び出し、ストリーミングなら差分を呼び出し元へ流しながら本文を組み立てる
//! 5. 成功なら `success` と次のステップ番号を、失敗なら `error` とメッセージを保存
//!
//! プロバイダー呼び出しの失敗はステップの `error` として記録され、操作自体は成功します。
//! ストアへの書き込み失敗は操作の失敗（[`ExecutionError::StoreError`]）です。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepchain::config::WorkflowTemplate;
//! use stepchain::engine::WorkflowExecutor;
//! use stepchain::relay::Relay;
//! use stepchain::store::InMemoryStore;
//!
//! async fn example(relay: Arc<dyn Relay>) -> Result<(), Box<dyn std::error::Error>> {
//!     let template = WorkflowTemplate::from_file("templates/market-research.toml")?;
//!     let executor = WorkflowExecutor::new(Arc::new(InMemoryStore::new()), relay, 2);
//!
//!     let workflow = executor.create_workflow("alice", "EV market", &template).await?;
//!     let outcome = executor
//!         .start_step("alice", &workflow.id, 0, "Electric vehicle batteries")
//!         .await?;
//!     println!("{}: {}", outcome.index, outcome.content);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::WorkflowTemplate;
use crate::engine::context::{ExecutionContext, StepStatus, TransitionError};
use crate::engine::memory::ConversationMemory;
use crate::engine::result::{ExecutionError, StepOutcome};
use crate::error::RelayError;
use crate::provider::CanonicalRequest;
use crate::relay::{CallMetadata, Relay, RelayCall};
use crate::store::{ContextMutation, Workflow, WorkflowStore};

/// 非ストリーミング応答に本文が無かった場合の内容
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "[No content found in non-streaming response]";

/// 中断されたステップに記録するメッセージ
pub const INTERRUPTED_MESSAGE: &str = "Generation was interrupted before it finished.";

/// ステップに記録するユーザー向けエラーメッセージ
pub fn error_content(message: impl std::fmt::Display) -> String {
    format!("**Error:** {message}")
}

/// ミリ秒に変換する。`u64` に収まらない場合は上限に張り付く
fn as_millis_u64(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// 生成差分の送り先
pub type DeltaSender = mpsc::UnboundedSender<String>;

/// ワークフロー実行エンジン
///
/// ストアとリレーは `Arc` で共有され、HTTP ハンドラーから同時に呼び出されても安全です。
/// 同じワークフローへの同時開始は、ストアの [`update`](WorkflowStore::update) による
/// 遷移検証で片方だけが成功します。
pub struct WorkflowExecutor {
    store: Arc<dyn WorkflowStore>,
    relay: Arc<dyn Relay>,
    memory: ConversationMemory,
}

impl WorkflowExecutor {
    /// 新しいエグゼキューターを生成
    ///
    /// 要約とステップ生成は同じ `relay` を共有します。
    pub fn new(store: Arc<dyn WorkflowStore>, relay: Arc<dyn Relay>, window_size: usize) -> Self {
        Self {
            memory: ConversationMemory::new(relay.clone(), window_size),
            store,
            relay,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// テンプレートのスナップショットから新しいワークフローを作成
    pub async fn create_workflow(
        &self,
        user_id: &str,
        title: &str,
        template: &WorkflowTemplate,
    ) -> Result<Workflow, ExecutionError> {
        if title.trim().is_empty() {
            return Err(ExecutionError::ValidationError(
                "Workflow title is required".to_string(),
            ));
        }

        let workflow = Workflow::new(user_id, title.trim(), template.clone());
        self.store.insert(workflow.clone()).await?;
        info!(
            workflow_id = %workflow.id,
            user_id,
            template = template.name(),
            steps = workflow.execution_context.len(),
            "ワークフローを作成しました"
        );
        Ok(workflow)
    }

    /// ステップを生成する（`StartStep`）
    ///
    /// `index` が現在のステップで、かつ `pending` である必要があります。
    pub async fn start_step(
        &self,
        actor: &str,
        workflow_id: &str,
        index: usize,
        user_input: &str,
    ) -> Result<StepOutcome, ExecutionError> {
        self.start_step_streaming(actor, workflow_id, index, user_input, None)
            .await
    }

    /// ステップを生成し、ストリーミング時は生成差分を `deltas` へ送る
    ///
    /// 受信側が閉じていても生成は最後まで行われ、結果は保存されます。
    pub async fn start_step_streaming(
        &self,
        actor: &str,
        workflow_id: &str,
        index: usize,
        user_input: &str,
        deltas: Option<DeltaSender>,
    ) -> Result<StepOutcome, ExecutionError> {
        let workflow = self.store.workflow(workflow_id).await?;
        if let Some(step) = workflow.template_snapshot.step(index)
            && step.final_prompt(user_input).is_empty()
        {
            return Err(ExecutionError::ValidationError(format!(
                "User input is required for step '{}'",
                step.name()
            )));
        }

        let input = user_input.to_string();
        let claim: ContextMutation = Box::new(move |ctx| ctx.begin_generation(index, input));
        self.run_step(actor, workflow_id, index, claim, deltas).await
    }

    /// 失敗したステップを同じ入力でやり直す（`Retry`）
    ///
    /// `Invalidate(index)` と `StartStep(index, 前回の入力)` を 1 回の書き込みで行います。
    pub async fn retry(
        &self,
        actor: &str,
        workflow_id: &str,
        index: usize,
        deltas: Option<DeltaSender>,
    ) -> Result<StepOutcome, ExecutionError> {
        self.rerun(actor, workflow_id, index, StepStatus::Error, deltas)
            .await
    }

    /// 成功したステップを同じ入力で生成し直す（`Regenerate`）
    ///
    /// 後続のステップはすべて `pending` に戻ります。
    pub async fn regenerate(
        &self,
        actor: &str,
        workflow_id: &str,
        index: usize,
        deltas: Option<DeltaSender>,
    ) -> Result<StepOutcome, ExecutionError> {
        self.rerun(actor, workflow_id, index, StepStatus::Success, deltas)
            .await
    }

    /// 編集を開始する（`success / view → edit`）
    pub async fn begin_edit(
        &self,
        workflow_id: &str,
        index: usize,
    ) -> Result<ExecutionContext, ExecutionError> {
        self.mutate(workflow_id, Box::new(move |ctx| ctx.begin_edit(index)))
            .await
    }

    /// 編集を取り消す（内容は変更しない）
    pub async fn cancel_edit(
        &self,
        workflow_id: &str,
        index: usize,
    ) -> Result<ExecutionContext, ExecutionError> {
        self.mutate(workflow_id, Box::new(move |ctx| ctx.cancel_edit(index)))
            .await
    }

    /// 編集内容を保存する（`SaveEdit`）
    ///
    /// 保存後、`index` より後のステップは常に `pending` に戻ります。
    pub async fn save_edit(
        &self,
        workflow_id: &str,
        index: usize,
        content: &str,
    ) -> Result<ExecutionContext, ExecutionError> {
        let content = content.to_string();
        let context = self
            .mutate(
                workflow_id,
                Box::new(move |ctx| {
                    ctx.apply_edit(index, content)?;
                    ctx.invalidate_from(index + 1)
                }),
            )
            .await?;
        info!(workflow_id, index, "編集を保存し、後続ステップを無効化しました");
        Ok(context)
    }

    /// `from_index` 以降を初期状態に戻す（`Invalidate`）
    pub async fn invalidate(
        &self,
        workflow_id: &str,
        from_index: usize,
    ) -> Result<ExecutionContext, ExecutionError> {
        let context = self
            .mutate(
                workflow_id,
                Box::new(move |ctx| ctx.invalidate_from(from_index)),
            )
            .await?;
        info!(workflow_id, from_index, "ステップを無効化しました");
        Ok(context)
    }

    /// `generating` のまま残ったステップを `error` にする
    ///
    /// 生成中にプロセスが停止した場合の復旧用です。以後 `retry` が使えます。
    pub async fn recover_stuck(
        &self,
        workflow_id: &str,
        index: usize,
    ) -> Result<ExecutionContext, ExecutionError> {
        let context = self
            .mutate(
                workflow_id,
                Box::new(move |ctx| {
                    ctx.recover_interrupted(index, error_content(INTERRUPTED_MESSAGE))
                }),
            )
            .await?;
        warn!(workflow_id, index, "中断されたステップを error に戻しました");
        Ok(context)
    }

    async fn mutate(
        &self,
        workflow_id: &str,
        mutation: ContextMutation,
    ) -> Result<ExecutionContext, ExecutionError> {
        Ok(self.store.update(workflow_id, mutation).await?)
    }

    async fn rerun(
        &self,
        actor: &str,
        workflow_id: &str,
        index: usize,
        expected: StepStatus,
        deltas: Option<DeltaSender>,
    ) -> Result<StepOutcome, ExecutionError> {
        let claim: ContextMutation = Box::new(move |ctx| {
            let len = ctx.len();
            let step = ctx
                .step(index)
                .ok_or(TransitionError::OutOfRange { index, len })?;
            if step.status != expected {
                return Err(TransitionError::IllegalStatus {
                    index,
                    from: step.status,
                    to: StepStatus::Pending,
                });
            }
            let previous_input = step.user_input.clone();
            ctx.invalidate_from(index)?;
            ctx.begin_generation(index, previous_input)
        });
        self.run_step(actor, workflow_id, index, claim, deltas).await
    }

    /// `claim`（`generating` への遷移）を保存してから生成を行う
    async fn run_step(
        &self,
        actor: &str,
        workflow_id: &str,
        index: usize,
        claim: ContextMutation,
        deltas: Option<DeltaSender>,
    ) -> Result<StepOutcome, ExecutionError> {
        let workflow = self.store.workflow(workflow_id).await?;
        let template = workflow.template_snapshot;
        let started = Instant::now();

        let mut context = self.store.update(workflow_id, claim).await?;
        let user_input = context
            .step(index)
            .map(|step| step.user_input.clone())
            .unwrap_or_default();
        info!(workflow_id, index, template = template.name(), "ステップの生成を開始します");

        let metadata = CallMetadata {
            actor: actor.to_string(),
            workflow_id: Some(workflow_id.to_string()),
            template_name: Some(template.name().to_string()),
            step_index: Some(index),
            prompt_details: None,
        };

        let mut summarized = false;
        let mut failure = None;
        if let Some(through) = self.memory.pending_summary(&context, index) {
            match self
                .memory
                .summarize(&template, &context, through, metadata.clone())
                .await
            {
                Ok(Some(summary)) => {
                    context = self
                        .store
                        .update(
                            workflow_id,
                            Box::new(move |ctx| {
                                ctx.record_summary(through, summary);
                                Ok(())
                            }),
                        )
                        .await?;
                    summarized = true;
                    info!(workflow_id, index, through, "要約を保存しました");
                }
                Ok(None) => {}
                Err(err) => failure = Some(err),
            }
        }

        let generated = match failure {
            Some(err) => Err(err),
            None => {
                self.generate(&template, &context, index, &user_input, metadata, deltas)
                    .await
            }
        };

        let (status, content) = match generated {
            Ok(text) => (StepStatus::Success, text),
            Err(err) => {
                error!(workflow_id, index, error = %err, "ステップの生成に失敗しました");
                (StepStatus::Error, error_content(&err))
            }
        };
        let stored = content.clone();
        let finish: ContextMutation = match status {
            StepStatus::Success => Box::new(move |ctx| ctx.complete_generation(index, stored)),
            _ => Box::new(move |ctx| ctx.fail_generation(index, stored)),
        };
        let context = self.store.update(workflow_id, finish).await?;

        let duration_ms = as_millis_u64(started.elapsed());
        info!(workflow_id, index, ?status, duration_ms, "ステップの生成を終了しました");
        Ok(StepOutcome {
            workflow_id: workflow_id.to_string(),
            index,
            status,
            content,
            summarized,
            duration_ms,
            context,
        })
    }

    /// メッセージ列を組み立ててリレーを呼び出し、本文を返す
    async fn generate(
        &self,
        template: &WorkflowTemplate,
        context: &ExecutionContext,
        index: usize,
        user_input: &str,
        metadata: CallMetadata,
        deltas: Option<DeltaSender>,
    ) -> Result<String, RelayError> {
        let model = template.model_for(index).ok_or_else(|| {
            let key = template
                .step(index)
                .and_then(|step| step.model())
                .unwrap_or(template.model());
            RelayError::Configuration(format!("Model configuration ({key}) was not found."))
        })?;
        let composed = self.memory.compose(template, context, index, user_input);

        let call = RelayCall {
            request: CanonicalRequest {
                provider: model.provider,
                model_id: model.model_id.to_string(),
                messages: composed.messages,
                global_instruction: template.global_instruction().map(str::to_string),
                stream: model.api.stream,
            },
            path: model.api.path.to_string(),
            metadata: CallMetadata {
                prompt_details: Some(composed.prompt_details),
                ..metadata
            },
        };

        let response = self.relay.invoke(call).await?;
        let text = response
            .into_text(model.provider, |delta| {
                if let Some(tx) = &deltas {
                    // 受信側が閉じていても生成は続ける
                    let _ = tx.send(delta.to_string());
                }
            })
            .await?;

        if text.is_empty() && !model.api.stream {
            return Ok(EMPTY_RESPONSE_PLACEHOLDER.to_string());
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::StepMode;
    use crate::relay::{RelayResponse, RelayStream};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 呼び出しを記録するモックリレー
    ///
    /// - 要約呼び出し（`step_index = None`）には `"summary {n}"` を返す
    /// - ステップ呼び出しには `"output {index}"` を OpenAI 形式のストリームで返す
    /// - ステップ呼び出しの時点でストアに保存されている要約を記録する
    struct MockRelay {
        calls: Mutex<Vec<RelayCall>>,
        summaries_seen: Mutex<Vec<String>>,
        store: Arc<dyn WorkflowStore>,
        fail_with: Option<RelayError>,
        delay: Duration,
    }

    impl MockRelay {
        fn new(store: Arc<dyn WorkflowStore>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                summaries_seen: Mutex::new(Vec::new()),
                store,
                fail_with: None,
                delay: Duration::ZERO,
            }
        }

        fn failing(store: Arc<dyn WorkflowStore>, err: RelayError) -> Self {
            Self {
                fail_with: Some(err),
                ..Self::new(store)
            }
        }

        fn calls(&self) -> Vec<RelayCall> {
            self.calls.lock().unwrap().clone()
        }

        fn step_calls(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.metadata.step_index.is_some())
                .count()
        }

        fn summary_calls(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.metadata.step_index.is_none())
                .count()
        }
    }

    #[async_trait]
    impl Relay for MockRelay {
        async fn invoke(&self, call: RelayCall) -> Result<RelayResponse, RelayError> {
            let summary_count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(call.clone());
                calls
                    .iter()
                    .filter(|c| c.metadata.step_index.is_none())
                    .count()
            };
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }

            match call.metadata.step_index {
                None => Ok(RelayResponse::Buffered {
                    status: 200,
                    payload: json!({"choices": [{"message": {"content": format!("summary {summary_count}")}}]}),
                }),
                Some(index) => {
                    let workflow_id = call.metadata.workflow_id.clone().unwrap_or_default();
                    let summary = self
                        .store
                        .get(&workflow_id)
                        .await
                        .map(|ctx| ctx.summary().to_string())
                        .unwrap_or_default();
                    self.summaries_seen.lock().unwrap().push(summary);

                    let chunks: Vec<String> = ["output ".to_string(), index.to_string()]
                        .iter()
                        .map(|part| {
                            format!(
                                "data: {}\n\n",
                                json!({"choices": [{"delta": {"content": part}}]})
                            )
                        })
                        .chain(["data: [DONE]\n\n".to_string()])
                        .collect();
                    Ok(RelayResponse::Streaming {
                        status: 200,
                        body: RelayStream::from_chunks(chunks),
                    })
                }
            }
        }
    }

    fn template(steps: usize) -> WorkflowTemplate {
        let mut toml = String::from("name = \"report\"\nmodel = \"OpenAI__gpt-4o\"\n");
        for index in 0..steps {
            toml.push_str(&format!(
                "[[steps]]\nname = \"step {index}\"\nprompt = \"Prompt {index}.\"\n"
            ));
        }
        WorkflowTemplate::from_toml(&toml).unwrap()
    }

    async fn setup(
        steps: usize,
        relay: impl FnOnce(Arc<dyn WorkflowStore>) -> MockRelay,
    ) -> (Arc<MockRelay>, WorkflowExecutor, String) {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let relay = Arc::new(relay(store.clone()));
        let executor = WorkflowExecutor::new(store, relay.clone(), 2);
        let workflow = executor
            .create_workflow("alice", "test", &template(steps))
            .await
            .unwrap();
        (relay, executor, workflow.id)
    }

    #[tokio::test]
    async fn test_start_step_success() {
        let (relay, executor, id) = setup(3, MockRelay::new).await;

        let outcome = executor.start_step("alice", &id, 0, "topic").await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.content, "output 0");
        assert_eq!(outcome.context.current_step_index(), 1);

        let stored = executor.store().get(&id).await.unwrap();
        assert_eq!(stored.step(0).unwrap().status, StepStatus::Success);
        assert_eq!(stored.step(0).unwrap().user_input, "topic");

        let call = &relay.calls()[0];
        assert!(call.request.stream);
        assert_eq!(call.metadata.actor, "alice");
        assert_eq!(call.metadata.step_index, Some(0));
        assert_eq!(call.request.messages.last().unwrap().content, "Prompt 0.\n\ntopic");
        assert_eq!(
            call.metadata.prompt_details.as_ref().unwrap()["finalUserPrompt"],
            "Prompt 0.\n\ntopic"
        );
    }

    #[tokio::test]
    async fn test_streaming_deltas_are_forwarded() {
        let (_, executor, id) = setup(1, MockRelay::new).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        executor
            .start_step_streaming("alice", &id, 0, "x", Some(tx))
            .await
            .unwrap();

        let mut deltas = Vec::new();
        while let Some(delta) = rx.recv().await {
            deltas.push(delta);
        }
        assert_eq!(deltas, vec!["output ", "0"]);
    }

    #[tokio::test]
    async fn test_no_summary_within_window() {
        let (relay, executor, id) = setup(4, MockRelay::new).await;
        executor.start_step("alice", &id, 0, "a").await.unwrap();
        let outcome = executor.start_step("alice", &id, 1, "b").await.unwrap();

        assert!(!outcome.summarized);
        assert_eq!(relay.summary_calls(), 0);
        assert_eq!(relay.step_calls(), 2);
    }

    #[tokio::test]
    async fn test_summary_persisted_before_step_call() {
        let (relay, executor, id) = setup(4, MockRelay::new).await;
        for (index, input) in ["a", "b"].into_iter().enumerate() {
            executor.start_step("alice", &id, index, input).await.unwrap();
        }

        let outcome = executor.start_step("alice", &id, 2, "c").await.unwrap();
        assert!(outcome.summarized);
        assert_eq!(outcome.context.summary(), "summary 1");
        assert_eq!(outcome.context.summary_through(), Some(0));

        let calls = relay.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].metadata.step_index, None);
        assert_eq!(calls[3].metadata.step_index, Some(2));
        assert_eq!(
            relay.summaries_seen.lock().unwrap().last().unwrap(),
            "summary 1"
        );
        assert!(calls[3].request.messages[0]
            .content
            .starts_with("--- Previous conversation summary ---\nsummary 1"));
    }

    #[tokio::test]
    async fn test_retry_reuses_existing_summary() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let good = Arc::new(MockRelay::new(store.clone()));
        let executor = WorkflowExecutor::new(store.clone(), good.clone(), 2);
        let workflow = executor
            .create_workflow("alice", "t", &template(4))
            .await
            .unwrap();
        for (index, input) in ["a", "b", "c"].into_iter().enumerate() {
            executor
                .start_step("alice", &workflow.id, index, input)
                .await
                .unwrap();
        }
        assert_eq!(good.summary_calls(), 1);

        // ステップ 3 は [0, 1] の要約が必要
        let outcome = executor
            .start_step("alice", &workflow.id, 3, "d")
            .await
            .unwrap();
        assert!(outcome.summarized);
        assert_eq!(good.summary_calls(), 2);

        executor
            .regenerate("alice", &workflow.id, 3, None)
            .await
            .unwrap();
        assert_eq!(good.summary_calls(), 2);
    }

    #[tokio::test]
    async fn test_relay_failure_marks_step_error() {
        let (_, executor, id) = setup(2, |store| {
            MockRelay::failing(
                store,
                RelayError::Configuration("Google API key is not set.".to_string()),
            )
        })
        .await;

        let outcome = executor.start_step("alice", &id, 0, "x").await.unwrap();
        assert_eq!(outcome.status, StepStatus::Error);
        assert_eq!(outcome.content, "**Error:** Google API key is not set.");
        assert_eq!(outcome.context.current_step_index(), 0);

        let stored = executor.store().get(&id).await.unwrap();
        assert_eq!(stored.step(0).unwrap().status, StepStatus::Error);
    }

    #[tokio::test]
    async fn test_retry_from_error_uses_previous_input() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let failing = Arc::new(MockRelay::failing(
            store.clone(),
            RelayError::Upstream { status: 503 },
        ));
        let executor = WorkflowExecutor::new(store.clone(), failing, 2);
        let workflow = executor
            .create_workflow("alice", "t", &template(2))
            .await
            .unwrap();
        let outcome = executor
            .start_step("alice", &workflow.id, 0, "original input")
            .await
            .unwrap();
        assert_eq!(outcome.content, "**Error:** HTTP Status 503");

        let working = Arc::new(MockRelay::new(store.clone()));
        let executor = WorkflowExecutor::new(store, working.clone(), 2);
        let outcome = executor.retry("alice", &workflow.id, 0, None).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.context.step(0).unwrap().user_input, "original input");
        assert!(working.calls()[0]
            .request
            .messages
            .last()
            .unwrap()
            .content
            .ends_with("original input"));
    }

    #[tokio::test]
    async fn test_retry_requires_error_status() {
        let (relay, executor, id) = setup(2, MockRelay::new).await;
        executor.start_step("alice", &id, 0, "a").await.unwrap();

        let err = executor.retry("alice", &id, 0, None).await.unwrap_err();
        assert!(matches!(err, ExecutionError::TransitionError(_)));
        let err = executor.regenerate("alice", &id, 1, None).await.unwrap_err();
        assert!(matches!(err, ExecutionError::TransitionError(_)));
        assert_eq!(relay.step_calls(), 1);
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_later_steps() {
        let (_, executor, id) = setup(3, MockRelay::new).await;
        for (index, input) in ["a", "b", "c"].into_iter().enumerate() {
            executor.start_step("alice", &id, index, input).await.unwrap();
        }

        let outcome = executor.regenerate("alice", &id, 1, None).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.context.current_step_index(), 2);
        assert_eq!(outcome.context.step(1).unwrap().user_input, "b");
        assert_eq!(outcome.context.step(2).unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_start_rejects_non_current_step() {
        let (relay, executor, id) = setup(3, MockRelay::new).await;
        let err = executor.start_step("alice", &id, 1, "x").await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::TransitionError(TransitionError::NotCurrent { index: 1, current: 0 })
        ));
        assert!(relay.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_on_completed_workflow_is_out_of_range() {
        let (_, executor, id) = setup(1, MockRelay::new).await;
        executor.start_step("alice", &id, 0, "a").await.unwrap();
        let err = executor.start_step("alice", &id, 1, "b").await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::TransitionError(TransitionError::OutOfRange { index: 1, len: 1 })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_start_invokes_relay_once() {
        let (relay, executor, id) = setup(2, |store| MockRelay {
            delay: Duration::from_millis(50),
            ..MockRelay::new(store)
        })
        .await;

        let (first, second) = tokio::join!(
            executor.start_step("alice", &id, 0, "first"),
            executor.start_step("bob", &id, 0, "second"),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ExecutionError::TransitionError(_))
        )));
        assert_eq!(relay.step_calls(), 1);
    }

    #[tokio::test]
    async fn test_save_edit_invalidates_later_steps() {
        let (_, executor, id) = setup(4, MockRelay::new).await;
        for (index, input) in ["a", "b", "c"].into_iter().enumerate() {
            executor.start_step("alice", &id, index, input).await.unwrap();
        }

        executor.begin_edit(&id, 1).await.unwrap();
        let context = executor.save_edit(&id, 1, "edited").await.unwrap();

        assert_eq!(context.step(1).unwrap().content, "edited");
        assert_eq!(context.step(1).unwrap().mode, StepMode::View);
        assert_eq!(context.current_step_index(), 2);
        assert!(context.results()[2..]
            .iter()
            .all(|step| step.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn test_save_edit_on_last_completed_step() {
        let (_, executor, id) = setup(2, MockRelay::new).await;
        executor.start_step("alice", &id, 0, "a").await.unwrap();
        executor.start_step("alice", &id, 1, "b").await.unwrap();

        executor.begin_edit(&id, 1).await.unwrap();
        let context = executor.save_edit(&id, 1, "final").await.unwrap();
        assert_eq!(context.current_step_index(), 2);
        assert_eq!(context.step(1).unwrap().status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_save_edit_requires_edit_mode() {
        let (_, executor, id) = setup(2, MockRelay::new).await;
        executor.start_step("alice", &id, 0, "a").await.unwrap();
        let err = executor.save_edit(&id, 0, "x").await.unwrap_err();
        assert!(matches!(err, ExecutionError::TransitionError(_)));
        assert_eq!(
            executor.store().get(&id).await.unwrap().step(0).unwrap().content,
            "output 0"
        );
    }

    #[tokio::test]
    async fn test_cancel_edit_keeps_content() {
        let (_, executor, id) = setup(2, MockRelay::new).await;
        executor.start_step("alice", &id, 0, "a").await.unwrap();
        executor.begin_edit(&id, 0).await.unwrap();
        let context = executor.cancel_edit(&id, 0).await.unwrap();
        assert_eq!(context.step(0).unwrap().mode, StepMode::View);
        assert_eq!(context.step(0).unwrap().content, "output 0");
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (_, executor, id) = setup(3, MockRelay::new).await;
        executor.start_step("alice", &id, 0, "a").await.unwrap();
        executor.start_step("alice", &id, 1, "b").await.unwrap();

        let once = executor.invalidate(&id, 1).await.unwrap();
        let twice = executor.invalidate(&id, 1).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.current_step_index(), 1);
    }

    #[tokio::test]
    async fn test_recover_stuck_step() {
        let (_, executor, id) = setup(2, MockRelay::new).await;
        executor
            .store()
            .update(&id, Box::new(|ctx| ctx.begin_generation(0, "a")))
            .await
            .unwrap();

        let context = executor.recover_stuck(&id, 0).await.unwrap();
        assert_eq!(context.step(0).unwrap().status, StepStatus::Error);
        assert_eq!(
            context.step(0).unwrap().content,
            error_content(INTERRUPTED_MESSAGE)
        );

        let outcome = executor.retry("alice", &id, 0, None).await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let (_, executor, _) = setup(1, MockRelay::new).await;
        let err = executor.start_step("alice", "missing", 0, "x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_workflow_requires_title() {
        let (_, executor, _) = setup(1, MockRelay::new).await;
        let err = executor
            .create_workflow("alice", "  ", &template(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ValidationError(_)));
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(as_millis_u64(Duration::from_millis(1500)), 1500);
        assert_eq!(as_millis_u64(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_start_requires_input_when_prompt_is_empty() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let relay = Arc::new(MockRelay::new(store.clone()));
        let executor = WorkflowExecutor::new(store, relay.clone(), 2);
        let template = WorkflowTemplate::from_toml(
            "name = \"free\"\nmodel = \"OpenAI__gpt-4o\"\n[[steps]]\nname = \"ask\"\n",
        )
        .unwrap();
        let workflow = executor.create_workflow("alice", "free", &template).await.unwrap();

        let err = executor
            .start_step("alice", &workflow.id, 0, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ValidationError(_)));
        assert!(relay.calls().is_empty());
        let stored = executor.store().get(&workflow.id).await.unwrap();
        assert_eq!(stored.step(0).unwrap().status, StepStatus::Pending);

        let outcome = executor
            .start_step("alice", &workflow.id, 0, "question")
            .await
            .unwrap();
        assert!(outcome.is_success());
    }
}
