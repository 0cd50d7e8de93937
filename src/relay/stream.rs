//! 中継ストリーム
//!
//! 上流から受信したチャンクをそのままの境界・順序で呼び出し元へ流します。
//! 実体は `tokio::sync::mpsc` の受信側で、送信側はリレーの中継タスクが保持します。

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// 中継タスクと呼び出し元の間のバッファ（チャンク数）
pub const CHANNEL_CAPACITY: usize = 32;

/// 中継されるバイトストリーム
///
/// 接続途中で上流が失敗した場合、最後の要素として `Err(RelayError::Transport)` が届きます。
#[derive(Debug)]
pub struct RelayStream {
    rx: mpsc::Receiver<Result<Bytes, RelayError>>,
}

impl RelayStream {
    /// 送信側と組で生成する
    pub fn channel() -> (mpsc::Sender<Result<Bytes, RelayError>>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// 既知のチャンク列から生成する（テストやモック向け）
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Bytes> = chunks.into_iter().map(Into::into).collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // 容量はチャンク数ぶん確保済み
            let _ = tx.try_send(Ok(chunk));
        }
        Self { rx }
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
