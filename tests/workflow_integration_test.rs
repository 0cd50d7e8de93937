use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use stepchain::config::{TemplateRegistry, WorkflowTemplate};
use stepchain::engine::{StepStatus, WorkflowExecutor};
use stepchain::error::RelayError;
use stepchain::relay::{Relay, RelayCall, RelayResponse};
use stepchain::store::{FileStore, WorkflowStore};

const TEMPLATES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");

/// 呼び出しを記録し、ステップ番号に応じた本文を返す
#[derive(Default)]
struct ScriptedRelay {
    calls: Mutex<Vec<RelayCall>>,
}

#[async_trait]
impl Relay for ScriptedRelay {
    async fn invoke(&self, call: RelayCall) -> Result<RelayResponse, RelayError> {
        let text = match call.metadata.step_index {
            Some(index) => format!("answer {index}"),
            None => "condensed history".to_string(),
        };
        self.calls.lock().unwrap().push(call);
        Ok(RelayResponse::Buffered {
            status: 200,
            payload: json!({"choices": [{"message": {"content": text}}]}),
        })
    }
}

#[test]
fn test_load_shipped_templates() {
    let registry = TemplateRegistry::load_dir(TEMPLATES_DIR).expect("Failed to load templates");
    let template = registry.get("market-research").expect("template missing");

    assert_eq!(template.model(), "OpenAI__gpt-4o");
    assert!(template.global_instruction().is_some());
    assert_eq!(template.steps().len(), 3);
    assert_eq!(
        template.model_for(2).unwrap().key(),
        "Anthropic__claude-sonnet-4-20250514"
    );
}

#[test]
fn test_template_roundtrip_with_real_file() {
    let path = format!("{TEMPLATES_DIR}/market-research.toml");
    let original = WorkflowTemplate::from_file(&path).expect("Failed to load template");

    let toml = original.to_toml().expect("Failed to serialize");
    let restored = WorkflowTemplate::from_toml(&toml).expect("Failed to parse");

    assert_eq!(restored, original);
}

#[tokio::test]
async fn test_full_workflow_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let registry = TemplateRegistry::load_dir(TEMPLATES_DIR).unwrap();
    let template = registry.get("market-research").unwrap();
    let relay = Arc::new(ScriptedRelay::default());
    let store = Arc::new(FileStore::new(dir.path()));
    let executor = WorkflowExecutor::new(store.clone(), relay.clone(), 2);

    let workflow = executor
        .create_workflow("alice", "EV market", template)
        .await
        .unwrap();
    for (index, input) in ["EV batteries", "", "board"].into_iter().enumerate() {
        let outcome = executor
            .start_step("alice", &workflow.id, index, input)
            .await
            .unwrap();
        assert_eq!(outcome.status, StepStatus::Success);
        assert_eq!(outcome.content, format!("answer {index}"));
        assert_eq!(outcome.summarized, index == 2);
    }

    // 3 ステップ + 要約 1 回
    {
        let calls = relay.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let summary_call = &calls[2];
        assert_eq!(summary_call.metadata.step_index, None);
        assert!(!summary_call.request.stream);
        let last = &calls[3];
        assert_eq!(last.request.model_id, "claude-sonnet-4-20250514");
        assert!(last.request.messages[0].content.contains("condensed history"));
    }

    // 再起動後も状態が残る
    let reopened = FileStore::new(dir.path());
    let context = reopened.get(&workflow.id).await.unwrap();
    assert!(context.is_complete());
    assert_eq!(context.summary(), "condensed history");
    assert_eq!(context.summary_through(), Some(0));

    // 先頭を編集すると後続はすべて pending に戻り、要約も破棄される
    executor.begin_edit(&workflow.id, 0).await.unwrap();
    let context = executor
        .save_edit(&workflow.id, 0, "Edited scope")
        .await
        .unwrap();
    assert_eq!(context.current_step_index(), 1);
    assert_eq!(context.results()[0].content, "Edited scope");
    assert!(
        context.results()[1..]
            .iter()
            .all(|step| step.status == StepStatus::Pending)
    );
    assert_eq!(context.summary_through(), None);
}
