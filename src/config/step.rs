//! テンプレートのステップ定義
//!
//! # 責務
//!
//! Workflow テンプレートを構成するステップの定義体を提供するモジュール
//! アプリケーションに対して、[TemplateStep] を提供する。

use super::dto::TemplateStepDto;
use crate::error::ConfigError;
use crate::provider::resolve_model;

/// テンプレートのステップ（ドメインモデル）
///
/// ## DTO との違い
///
/// - [`TemplateStepDto`](super::dto::TemplateStepDto): TOML デシリアライズ専用
/// - [`TemplateStep`]: バリデーション済み（名前が空でない、モデルキーがカタログに存在する）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStep {
    name: String,
    instruction: String,
    prompt: String,
    model: Option<String>,
}

impl TemplateStep {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: String::new(),
            prompt: prompt.into(),
            model: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// ユーザーへの入力案内
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// ユーザー入力の前に付けるプロンプト
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// ステップ固有のモデルキー
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// ステップに送る最終プロンプト: `trim(prompt + "\n\n" + user_input)`
    ///
    /// ```rust
    /// use stepchain::config::TemplateStep;
    ///
    /// let step = TemplateStep::new("outline", "Write an outline.");
    /// assert_eq!(step.final_prompt("EV batteries"), "Write an outline.\n\nEV batteries");
    /// assert_eq!(step.final_prompt(""), "Write an outline.");
    /// ```
    pub fn final_prompt(&self, user_input: &str) -> String {
        format!("{}\n\n{}", self.prompt, user_input).trim().to_string()
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// バリデーションを実施し、不正なデータの場合は [`ConfigError::Validation`] を返します。
impl TryFrom<TemplateStepDto> for TemplateStep {
    type Error = ConfigError;

    fn try_from(dto: TemplateStepDto) -> Result<Self, Self::Error> {
        if dto.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ステップ名が空です".to_string(),
            ));
        }
        if let Some(model) = dto.model.as_deref()
            && resolve_model(model).is_none()
        {
            return Err(ConfigError::Validation(format!(
                "ステップ '{}' のモデル '{model}' はカタログに存在しません",
                dto.name
            )));
        }

        Ok(Self {
            name: dto.name,
            instruction: dto.instruction,
            prompt: dto.prompt,
            model: dto.model.filter(|m| !m.is_empty()),
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
///
/// バリデーション済みのドメインモデルから DTO を生成するため、
/// この変換は失敗しません（`From` トレイトを使用）。
impl From<TemplateStep> for TemplateStepDto {
    fn from(step: TemplateStep) -> Self {
        Self {
            name: step.name,
            instruction: step.instruction,
            prompt: step.prompt,
            model: step.model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(name: &str, model: Option<&str>) -> TemplateStepDto {
        TemplateStepDto {
            name: name.to_string(),
            instruction: "Tell me about the market".to_string(),
            prompt: "Draft the introduction.".to_string(),
            model: model.map(str::to_string),
        }
    }

    #[test]
    fn test_valid_step() {
        let step = TemplateStep::try_from(dto("intro", Some("Google__gemini-2.5-flash"))).unwrap();
        assert_eq!(step.name(), "intro");
        assert_eq!(step.model(), Some("Google__gemini-2.5-flash"));
        assert_eq!(step.instruction(), "Tell me about the market");
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let err = TemplateStep::try_from(dto("  ", None)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let err = TemplateStep::try_from(dto("intro", Some("OpenAI__gpt-1"))).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_final_prompt_trims() {
        let step = TemplateStep::new("s", "");
        assert_eq!(step.final_prompt("  only input  "), "only input");
    }
}
