//! 増分イベント（server-sent events）のデコーダー
//!
//! 中継されたバイト列から `data:` 行を取り出し、JSON としてデコードします。
//!
//! - 行の途中で切れたチャンクは、改行が届くまで保持する
//! - 完結した行が JSON として解釈できない場合は保持し、次の `data:` 行と連結して 1 回だけ再試行する
//! - 再試行でも解釈できなければ黙って捨てる（エラーにはしない）
//! - `[DONE]` とコメント・`event:` などの非データ行は無視する

use serde_json::Value;
use tracing::debug;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// SSE デコーダー
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// 改行待ちの行の断片
    partial: Vec<u8>,
    /// 解釈に失敗して再試行待ちの `data:` の中身
    held: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// チャンクを投入し、完結したイベントを返す
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.partial.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=newline).collect();
            self.handle_line(&line[..line.len() - 1], &mut events);
        }
        events
    }

    /// ストリーム終端。改行で終わらなかった最後の行を処理する
    pub fn finish(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        let rest = std::mem::take(&mut self.partial);
        if !rest.is_empty() {
            self.handle_line(&rest, &mut events);
        }
        if let Some(held) = self.held.take() {
            debug!(fragment_len = held.len(), "解釈できないイベントを破棄しました");
        }
        events
    }

    fn handle_line(&mut self, raw: &[u8], events: &mut Vec<Value>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);

        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.trim().is_empty() || data.trim() == DONE_MARKER {
            return;
        }

        if let Some(held) = self.held.take() {
            let joined = format!("{held}{data}");
            if let Ok(event) = serde_json::from_str(&joined) {
                events.push(event);
                return;
            }
            debug!(fragment_len = held.len(), "解釈できないイベントを破棄しました");
        }

        match serde_json::from_str(data) {
            Ok(event) => events.push(event),
            Err(_) => self.held = Some(data.to_string()),
        }
    }
}
