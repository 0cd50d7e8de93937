//! HTTP プロキシリレー
//!
//! # 処理フロー
//!
//! 1. ワイヤーボディを組み立て、監査レコードの下書きを作る
//! 2. 正規形リクエストの検証・資格情報の解決（失敗時はネットワーク通信せずに記録して終了）
//! 3. プロバイダーへ 1 回だけ送信
//! 4. ストリーミング: 中継タスクを起動し、受信チャンクを蓄積しながらそのまま転送
//!    非ストリーミング: 応答全体を読み込んで JSON として返却
//! 5. 完了時に監査レコードを 1 件記録（記録の失敗は警告ログのみ）
//!
//! 中継タスクは監査レコードを書き終えてから送信側を閉じます。
//! そのため、ストリームを最後まで読んだ呼び出し元からは、必ず記録済みの状態が観測できます。

use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{CallMetadata, Relay, RelayCall, RelayResponse, RelayStream};
use crate::audit::{AuditSink, InteractionRecord, RecordDraft};
use crate::config::ProvidersConfig;
use crate::credentials::CredentialResolver;
use crate::error::RelayError;
use crate::provider::CanonicalRequest;

/// HTTP でプロバイダーへ中継するリレー
pub struct ProxyRelay {
    client: reqwest::Client,
    endpoints: ProvidersConfig,
    credentials: Arc<dyn CredentialResolver>,
    audit: Arc<dyn AuditSink>,
}

impl ProxyRelay {
    pub fn new(
        endpoints: ProvidersConfig,
        credentials: Arc<dyn CredentialResolver>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            credentials,
            audit,
        }
    }

    /// HTTP クライアントを差し替える（プロキシ設定など）
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// 通信前の失敗を記録してエラーを返す
    async fn reject(&self, draft: RecordDraft, err: RelayError) -> RelayError {
        warn!(error = %err, "リクエストを拒否しました");
        append_record(self.audit.as_ref(), draft.failed(err.to_string(), None)).await;
        err
    }

    async fn buffered(
        &self,
        response: reqwest::Response,
        status: u16,
        draft: RecordDraft,
    ) -> Result<RelayResponse, RelayError> {
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = e.without_url().to_string();
                error!(error = %message, "応答の受信に失敗しました");
                append_record(self.audit.as_ref(), draft.failed(message.clone(), None)).await;
                return Err(RelayError::Transport(message));
            }
        };

        let raw = String::from_utf8_lossy(&bytes).into_owned();
        let success = is_success(status);
        let record = if success {
            draft.succeeded(raw.clone())
        } else {
            warn!(status, "プロバイダーがエラーを返しました");
            draft.failed(upstream_error(status), Some(raw.clone()))
        };
        append_record(self.audit.as_ref(), record).await;

        let payload = match serde_json::from_slice::<Value>(&bytes) {
            Ok(payload) => payload,
            Err(_) if !success => Value::String(raw),
            Err(e) => return Err(RelayError::Parse(e.to_string())),
        };
        Ok(RelayResponse::Buffered { status, payload })
    }
}

#[async_trait]
impl Relay for ProxyRelay {
    async fn invoke(&self, call: RelayCall) -> Result<RelayResponse, RelayError> {
        let RelayCall {
            request,
            path,
            metadata,
        } = call;
        let provider = request.provider;
        let adapter = provider.adapter();

        let body = adapter.build_body(&request);
        let draft = InteractionRecord::draft(
            &metadata,
            provider.as_str(),
            &request.model_id,
            request_payload(&request, &metadata, &body),
        );

        if let Err(err) = request.validate() {
            return Err(self.reject(draft, err).await);
        }
        let Some(credential) = self.credentials.resolve(provider).await else {
            let err = RelayError::Configuration(format!("{provider} API key is not set."));
            return Err(self.reject(draft, err).await);
        };
        let url = match adapter.endpoint(
            self.endpoints.base_url(provider),
            &path,
            &request,
            &credential,
        ) {
            Ok(url) => url,
            Err(err) => return Err(self.reject(draft, err).await),
        };

        let mut builder = self.client.post(url).json(&body);
        for (name, value) in adapter.auth_headers(&credential) {
            builder = builder.header(name, value);
        }

        info!(
            %provider,
            model_id = %request.model_id,
            stream = request.stream,
            step_index = ?metadata.step_index,
            "プロバイダーへ送信します"
        );
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = e.without_url().to_string();
                error!(%provider, error = %message, "プロバイダーへの接続に失敗しました");
                append_record(self.audit.as_ref(), draft.failed(message.clone(), None)).await;
                return Err(RelayError::Transport(message));
            }
        };
        let status = response.status().as_u16();

        if !request.stream {
            return self.buffered(response, status, draft).await;
        }

        let (tx, body) = RelayStream::channel();
        tokio::spawn(forward(
            response,
            tx,
            status,
            draft,
            Arc::clone(&self.audit),
        ));
        Ok(RelayResponse::Streaming { status, body })
    }
}

/// 上流のチャンクを蓄積しながら転送し、終了時に監査レコードを記録する
async fn forward(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<Bytes, RelayError>>,
    status: u16,
    draft: RecordDraft,
    audit: Arc<dyn AuditSink>,
) {
    let mut upstream = pin!(response.bytes_stream());
    let mut accumulated: Vec<u8> = Vec::new();
    let mut failure: Option<String> = None;

    while let Some(next) = upstream.next().await {
        match next {
            Ok(chunk) => {
                accumulated.extend_from_slice(&chunk);
                debug!(len = chunk.len(), "チャンクを中継します");
                // 呼び出し元が切断しても記録のために最後まで受信する
                if !tx.is_closed() && tx.send(Ok(chunk)).await.is_err() {
                    debug!("呼び出し元が切断しました");
                }
            }
            Err(e) => {
                let message = e.without_url().to_string();
                error!(error = %message, "ストリームの受信中に接続が失敗しました");
                let _ = tx.send(Err(RelayError::Transport(message.clone()))).await;
                failure = Some(message);
                break;
            }
        }
    }

    let payload = String::from_utf8_lossy(&accumulated).into_owned();
    let record = match failure {
        Some(message) => draft.failed(message, Some(payload).filter(|p| !p.is_empty())),
        None if is_success(status) => draft.succeeded(payload),
        None => {
            warn!(status, "プロバイダーがエラーを返しました");
            draft.failed(upstream_error(status), Some(payload))
        }
    };
    append_record(audit.as_ref(), record).await;
    drop(tx);
}

/// 監査レコードを記録する。失敗は警告ログに残して握りつぶす
async fn append_record(audit: &dyn AuditSink, record: InteractionRecord) {
    let id = record.id;
    if let Err(e) = audit.append(record).await {
        warn!(record_id = %id, error = %e, "監査レコードの記録に失敗しました");
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn upstream_error(status: u16) -> String {
    RelayError::Upstream { status }.to_string()
}

/// 監査用のリクエストペイロード
///
/// `{provider, modelId, promptDetails: {systemInstruction, ...promptDetails}, finalApiBody}`
fn request_payload(request: &CanonicalRequest, metadata: &CallMetadata, body: &Value) -> Value {
    let mut details = Map::new();
    details.insert(
        "systemInstruction".to_string(),
        Value::String(request.global_instruction.clone().unwrap_or_default()),
    );
    if let Some(Value::Object(extra)) = &metadata.prompt_details {
        details.extend(extra.clone());
    }

    json!({
        "provider": request.provider,
        "modelId": request.model_id,
        "promptDetails": details,
        "finalApiBody": body,
    })
}
