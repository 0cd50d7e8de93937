//! ワークフロー実行コンテキストとステップ状態遷移
//!
//! # 責務
//!
//! - 永続化される実行状態 [`ExecutionContext`] の定義（JSON 形状は camelCase）
//! - 各ステップの状態 [`StepResult`]（[`StepStatus`] × [`StepMode`]）の定義
//! - 遷移表に基づく状態変更の検証。不正な遷移は [`TransitionError`] で拒否し、
//!   コンテキストは一切変更しない
//!
//! # 遷移表
//!
//! ```text
//! pending ──begin──▶ generating ──complete──▶ success ◀──▶ (mode: view ⇄ edit)
//!    ▲                   │
//!    │                   └──fail / recover──▶ error
//!    └────────── invalidate ◀── success | error | pending
//! ```
//!
//! 変更メソッドはすべて `&mut self` を取り、検証に失敗した場合は状態を変えずにエラーを返します。
//! 書き込みは [`WorkflowExecutor`](crate::engine::executor::WorkflowExecutor) だけが行います。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ステップの生成状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// 未実行
    Pending,
    /// 生成中（プロバイダー呼び出し中）
    Generating,
    /// 生成成功
    Success,
    /// 生成失敗
    Error,
}

impl StepStatus {
    /// 遷移表: `self` から `next` への遷移が許可されているか
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Generating)
                | (Generating, Success)
                | (Generating, Error)
                | (Success, Pending)
                | (Error, Pending)
                | (Pending, Pending)
        )
    }
}

/// ステップ出力の表示モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    View,
    Edit,
}

/// 1 ステップ分の状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// 生成されたテキスト（失敗時はユーザー向けエラーメッセージ）
    pub content: String,
    pub mode: StepMode,
    pub status: StepStatus,
    /// 生成時のユーザー入力
    pub user_input: String,
}

impl StepResult {
    /// 初期状態（pending / view / 空）
    pub fn pending() -> Self {
        Self {
            content: String::new(),
            mode: StepMode::View,
            status: StepStatus::Pending,
            user_input: String::new(),
        }
    }

    /// 入力も出力も空か（要約対象として意味を持たない）
    pub fn is_blank(&self) -> bool {
        self.content.is_empty() && self.user_input.is_empty()
    }
}

impl Default for StepResult {
    fn default() -> Self {
        Self::pending()
    }
}

/// 状態遷移エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// ステップ番号が範囲外
    #[error("ステップ {index} は範囲外です（ステップ数: {len}）")]
    OutOfRange { index: usize, len: usize },

    /// 現在のステップ以外を開始しようとした
    #[error("ステップ {index} は現在のステップではありません（現在: {current}）")]
    NotCurrent { index: usize, current: usize },

    /// 遷移表にない状態変更
    #[error("ステップ {index} を {from:?} から {to:?} へ遷移できません")]
    IllegalStatus {
        index: usize,
        from: StepStatus,
        to: StepStatus,
    },

    /// 表示モードが操作の前提と一致しない
    #[error("ステップ {index} は {expected:?} モードではありません（現在: {actual:?}）")]
    IllegalMode {
        index: usize,
        expected: StepMode,
        actual: StepMode,
    },

    /// 未到達のステップから無効化しようとした
    #[error("ステップ {from_index} からは無効化できません（現在のステップ: {current}）")]
    InvalidateAhead { from_index: usize, current: usize },
}

/// ワークフロー 1 件分の実行コンテキスト
///
/// `results` の長さはワークフロー作成時にテンプレートのステップ数で固定されます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    current_step_index: usize,
    #[serde(default)]
    summary: String,
    /// `summary` が要約しているステップ範囲 `[0, summary_through]` の終端
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary_through: Option<usize>,
    results: Vec<StepResult>,
}

impl ExecutionContext {
    /// ステップ数 `step_count` の初期コンテキストを生成
    ///
    /// # 例
    ///
    /// ```rust
    /// use stepchain::engine::context::{ExecutionContext, StepStatus};
    ///
    /// let ctx = ExecutionContext::new(3);
    /// assert_eq!(ctx.current_step_index(), 0);
    /// assert!(ctx.results().iter().all(|r| r.status == StepStatus::Pending));
    /// ```
    pub fn new(step_count: usize) -> Self {
        Self {
            current_step_index: 0,
            summary: String::new(),
            summary_through: None,
            results: vec![StepResult::pending(); step_count],
        }
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn summary_through(&self) -> Option<usize> {
        self.summary_through
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn step(&self, index: usize) -> Option<&StepResult> {
        self.results.get(index)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// 全ステップが完了しているか
    pub fn is_complete(&self) -> bool {
        self.current_step_index >= self.results.len()
    }

    /// `pending → generating`
    ///
    /// `index` が現在のステップであり、かつ `pending` であることが前提です。
    /// 同じワークフローへの同時開始は、この検査で片方が拒否されます。
    pub fn begin_generation(
        &mut self,
        index: usize,
        user_input: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check_index(index)?;
        if index != self.current_step_index {
            return Err(TransitionError::NotCurrent {
                index,
                current: self.current_step_index,
            });
        }
        self.check_status(index, StepStatus::Generating)?;

        let step = &mut self.results[index];
        step.status = StepStatus::Generating;
        step.user_input = user_input.into();
        Ok(())
    }

    /// `generating → success`。次のステップへ進める
    pub fn complete_generation(
        &mut self,
        index: usize,
        content: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check_index(index)?;
        self.check_status(index, StepStatus::Success)?;

        let step = &mut self.results[index];
        step.status = StepStatus::Success;
        step.content = content.into();
        self.current_step_index = index + 1;
        Ok(())
    }

    /// `generating → error`。`content` にユーザー向けメッセージを格納する
    pub fn fail_generation(
        &mut self,
        index: usize,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check_index(index)?;
        self.check_status(index, StepStatus::Error)?;

        let step = &mut self.results[index];
        step.status = StepStatus::Error;
        step.content = message.into();
        Ok(())
    }

    /// `success / view → edit`
    pub fn begin_edit(&mut self, index: usize) -> Result<(), TransitionError> {
        self.check_index(index)?;
        let step = &self.results[index];
        if step.status != StepStatus::Success {
            return Err(TransitionError::IllegalStatus {
                index,
                from: step.status,
                to: StepStatus::Success,
            });
        }
        self.check_mode(index, StepMode::View)?;
        self.results[index].mode = StepMode::Edit;
        Ok(())
    }

    /// `edit → view`（内容は変更しない）
    pub fn cancel_edit(&mut self, index: usize) -> Result<(), TransitionError> {
        self.check_index(index)?;
        self.check_mode(index, StepMode::Edit)?;
        self.results[index].mode = StepMode::View;
        Ok(())
    }

    /// 編集内容を確定して `view` に戻す
    ///
    /// 後続ステップの無効化は呼び出し側（[`invalidate_from`](Self::invalidate_from)）で行います。
    /// 要約済み範囲内のステップを書き換えた場合、要約は破棄されます。
    pub fn apply_edit(
        &mut self,
        index: usize,
        content: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check_index(index)?;
        self.check_mode(index, StepMode::Edit)?;

        let step = &mut self.results[index];
        step.content = content.into();
        step.mode = StepMode::View;
        self.discard_summary_covering(index);
        Ok(())
    }

    /// `results[from_index..]` を初期状態に戻し、`current_step_index = from_index` とする
    ///
    /// 同じ `from_index` で繰り返し適用しても結果は変わりません。
    /// `generating` のステップを含む範囲は無効化できません。
    pub fn invalidate_from(&mut self, from_index: usize) -> Result<(), TransitionError> {
        let len = self.results.len();
        if from_index > len {
            return Err(TransitionError::OutOfRange {
                index: from_index,
                len,
            });
        }
        if from_index > self.current_step_index {
            return Err(TransitionError::InvalidateAhead {
                from_index,
                current: self.current_step_index,
            });
        }
        for index in from_index..len {
            self.check_status(index, StepStatus::Pending)?;
        }

        for step in &mut self.results[from_index..] {
            *step = StepResult::pending();
        }
        self.current_step_index = from_index;
        self.discard_summary_covering(from_index);
        Ok(())
    }

    /// 中断された生成（`generating` のまま残ったステップ）を `error` にする
    pub fn recover_interrupted(
        &mut self,
        index: usize,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check_index(index)?;
        let status = self.results[index].status;
        if status != StepStatus::Generating {
            return Err(TransitionError::IllegalStatus {
                index,
                from: status,
                to: StepStatus::Error,
            });
        }
        self.fail_generation(index, message)
    }

    /// ステップ `[0, through]` を要約したテキストを記録
    pub fn record_summary(&mut self, through: usize, text: impl Into<String>) {
        self.summary = text.into();
        self.summary_through = Some(through);
    }

    fn discard_summary_covering(&mut self, index: usize) {
        if self.summary_through.is_some_and(|through| index <= through) {
            self.summary.clear();
            self.summary_through = None;
        }
    }

    fn check_index(&self, index: usize) -> Result<(), TransitionError> {
        if index >= self.results.len() {
            return Err(TransitionError::OutOfRange {
                index,
                len: self.results.len(),
            });
        }
        Ok(())
    }

    fn check_status(&self, index: usize, to: StepStatus) -> Result<(), TransitionError> {
        let from = self.results[index].status;
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError::IllegalStatus { index, from, to })
        }
    }

    fn check_mode(&self, index: usize, expected: StepMode) -> Result<(), TransitionError> {
        let actual = self.results[index].mode;
        if actual == expected {
            Ok(())
        } else {
            Err(TransitionError::IllegalMode {
                index,
                expected,
                actual,
            })
        }
    }
}
