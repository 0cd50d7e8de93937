//! ワークフローテンプレートの読み込みと管理を行うモジュール
//!
//! # 責務
//!
//! このモジュールは、マルチステップのワークフローを TOML 形式で定義し、
//! それを Rust の型として扱うための機能を提供します。
//!
//! ## 主な機能
//!
//! - **TOML パース**: `templates/` ディレクトリ内の TOML ファイルを読み込み、
//!   [`WorkflowTemplate`] にデシリアライズ
//! - **バリデーション**: 名前・ステップ数・モデルキーを検証
//! - **スナップショット**: ワークフロー作成時にテンプレートを値としてコピーし、
//!   以後テンプレートが変わっても実行中のワークフローに影響しない
//!
//! ## 使用例
//!
//! ```toml
//! name = "market-research"
//! model = "OpenAI__gpt-4o"
//! global_instruction = "You are an excellent market analyst."
//!
//! [[steps]]
//! name = "1. Scope"
//! instruction = "Which market or product should we research?"
//! prompt = "Draft the table of contents and introduction of the report."
//!
//! [[steps]]
//! name = "2. Analysis"
//! prompt = "Derive at least three key implications from the material."
//! model = "Anthropic__claude-sonnet-4-20250514"
//! ```
//!
//! ## 関連モジュール
//!
//! - [`crate::config::step`]: 各ステップの定義
//! - [`crate::engine::executor`]: ステップの実行
//! - [`crate::provider::catalog`]: モデルキーの解決

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::dto::TemplateDto;
use super::step::TemplateStep;
use crate::error::ConfigError;
use crate::provider::{ModelSpec, resolve_model};

/// ワークフローテンプレート（ドメインモデル）
///
/// バリデーション済みの状態を保証します。
/// シリアライズ形式は DTO と同じため、ワークフローのスナップショットとして JSON に保存されても
/// 読み込み時に同じ検証が行われます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TemplateDto", into = "TemplateDto")]
pub struct WorkflowTemplate {
    name: String,
    model: String,
    global_instruction: Option<String>,
    steps: Vec<TemplateStep>,
}

impl WorkflowTemplate {
    /// TOML ファイルからテンプレートを読み込む
    ///
    /// # 処理フロー
    ///
    /// 1. ファイル読み込み
    /// 2. TOML デシリアライズ → [`TemplateDto`]
    /// 3. バリデーション & 変換 → [`WorkflowTemplate`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// TOML 文字列からテンプレートを読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let dto: TemplateDto = toml::from_str(toml)?;
        Self::try_from(dto)
    }

    /// テンプレートを TOML 文字列に変換
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let dto = TemplateDto::from(self.clone());
        Ok(toml::to_string(&dto)?)
    }

    /// テンプレートを TOML ファイルに保存
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 既定のモデルキー（要約にも使う）
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn global_instruction(&self) -> Option<&str> {
        self.global_instruction.as_deref()
    }

    pub fn steps(&self) -> &[TemplateStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&TemplateStep> {
        self.steps.get(index)
    }

    /// ステップ `index` で使うモデル（ステップの指定がテンプレートの既定より優先）
    pub fn model_for(&self, index: usize) -> Option<&'static ModelSpec> {
        let key = self
            .steps
            .get(index)
            .and_then(TemplateStep::model)
            .unwrap_or(&self.model);
        resolve_model(key)
    }

    /// テンプレートの既定モデル
    pub fn default_model(&self) -> Option<&'static ModelSpec> {
        resolve_model(&self.model)
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// # 処理フロー
///
/// 1. 名前・モデルキーのバリデーション
/// 2. ステップの変換（`TemplateStepDto` → `TemplateStep`）
/// 3. `WorkflowTemplate` の構築
impl TryFrom<TemplateDto> for WorkflowTemplate {
    type Error = ConfigError;

    fn try_from(dto: TemplateDto) -> Result<Self, Self::Error> {
        if dto.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "テンプレート名が空です".to_string(),
            ));
        }
        if resolve_model(&dto.model).is_none() {
            return Err(ConfigError::Validation(format!(
                "テンプレート '{}' のモデル '{}' はカタログに存在しません",
                dto.name, dto.model
            )));
        }
        if dto.steps.is_empty() {
            return Err(ConfigError::Validation(format!(
                "テンプレート '{}' にステップがありません",
                dto.name
            )));
        }

        let steps = dto
            .steps
            .into_iter()
            .map(TemplateStep::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: dto.name,
            model: dto.model,
            global_instruction: dto.global_instruction.filter(|text| !text.trim().is_empty()),
            steps,
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
///
/// バリデーション済みのドメインモデルから DTO を生成するため、
/// この変換は失敗しません（`From` トレイトを使用）。
impl From<WorkflowTemplate> for TemplateDto {
    fn from(template: WorkflowTemplate) -> Self {
        Self {
            name: template.name,
            model: template.model,
            global_instruction: template.global_instruction,
            steps: template.steps.into_iter().map(Into::into).collect(),
        }
    }
}

/// 名前で引けるテンプレートの一覧
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, WorkflowTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ディレクトリ内の `*.toml` をすべて読み込む
    ///
    /// ディレクトリが存在しない場合は空のレジストリを返します。
    /// 1 つでも不正なファイルがあれば、ファイル名付きの [`ConfigError::Validation`] を返します。
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let mut registry = Self::new();
        if !dir.exists() {
            return Ok(registry);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in paths {
            let template = WorkflowTemplate::from_file(&path).map_err(|e| {
                ConfigError::Validation(format!("{}: {e}", path.display()))
            })?;
            registry.insert(template)?;
        }
        info!(dir = %dir.display(), count = registry.len(), "テンプレートを読み込みました");
        Ok(registry)
    }

    /// テンプレートを追加する。同名のテンプレートがあればエラー
    pub fn insert(&mut self, template: WorkflowTemplate) -> Result<(), ConfigError> {
        if self.templates.contains_key(template.name()) {
            return Err(ConfigError::Validation(format!(
                "テンプレート名 '{}' が重複しています",
                template.name()
            )));
        }
        self.templates.insert(template.name().to_string(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowTemplate> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name = "report"
model = "OpenAI__gpt-4o"
global_instruction = "You are an analyst."

[[steps]]
name = "scope"
instruction = "What should we research?"
prompt = "Write the outline."

[[steps]]
name = "analysis"
prompt = "Analyse the material."
model = "Anthropic__claude-sonnet-4-20250514"
"#;

    #[test]
    fn test_from_toml() {
        let template = WorkflowTemplate::from_toml(SAMPLE).unwrap();

        assert_eq!(template.name(), "report");
        assert_eq!(template.global_instruction(), Some("You are an analyst."));
        assert_eq!(template.steps().len(), 2);
        assert_eq!(template.steps()[0].instruction(), "What should we research?");
        assert_eq!(template.steps()[1].instruction(), "");
    }

    #[test]
    fn test_step_model_overrides_template_model() {
        let template = WorkflowTemplate::from_toml(SAMPLE).unwrap();
        assert_eq!(template.model_for(0).unwrap().model_id, "gpt-4o");
        assert_eq!(
            template.model_for(1).unwrap().model_id,
            "claude-sonnet-4-20250514"
        );
        assert_eq!(template.default_model().unwrap().model_id, "gpt-4o");
    }

    #[test]
    fn test_toml_round_trip() {
        let template = WorkflowTemplate::from_toml(SAMPLE).unwrap();
        let again = WorkflowTemplate::from_toml(&template.to_toml().unwrap()).unwrap();
        assert_eq!(template, again);
    }

    #[test]
    fn test_json_snapshot_is_validated() {
        let template = WorkflowTemplate::from_toml(SAMPLE).unwrap();
        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json["steps"][1]["model"], "Anthropic__claude-sonnet-4-20250514");

        let restored: WorkflowTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(restored, template);

        let broken = serde_json::json!({"name": "x", "model": "OpenAI__gpt-4o", "steps": []});
        assert!(serde_json::from_value::<WorkflowTemplate>(broken).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let no_steps = "name = \"x\"\nmodel = \"OpenAI__gpt-4o\"\n";
        assert!(matches!(
            WorkflowTemplate::from_toml(no_steps),
            Err(ConfigError::Validation(_))
        ));

        let bad_model = "name = \"x\"\nmodel = \"OpenAI__nope\"\n[[steps]]\nname = \"s\"\n";
        assert!(matches!(
            WorkflowTemplate::from_toml(bad_model),
            Err(ConfigError::Validation(_))
        ));

        let no_name = "name = \"\"\nmodel = \"OpenAI__gpt-4o\"\n[[steps]]\nname = \"s\"\n";
        assert!(matches!(
            WorkflowTemplate::from_toml(no_name),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_registry_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.toml"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = TemplateRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("report").is_some());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["report"]);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("b.toml"), SAMPLE).unwrap();
        assert!(TemplateRegistry::load_dir(dir.path()).is_err());
    }

    #[test]
    fn test_registry_missing_dir_is_empty() {
        let registry = TemplateRegistry::load_dir("/nonexistent/stepchain-templates").unwrap();
        assert!(registry.is_empty());
    }
}
