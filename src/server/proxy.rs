//! `POST /llm/proxy`
//!
//! 呼び出し元の JSON をリレー呼び出しに変換して中継します。
//! ストリーミング応答は上流のバイト列をチャンク境界のまま
//! `text/event-stream` で返し、非ストリーミング応答は上流のステータスと JSON をそのまま返します。

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::{ApiError, AppState};
use crate::relay::{RelayRequest, RelayResponse};

pub const EVENT_STREAM: &str = "text/event-stream; charset=utf-8";

pub async fn relay(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let call = request.into_call(state.actor(&headers))?;
    debug!(
        provider = %call.request.provider,
        model = %call.request.model_id,
        stream = call.request.stream,
        "中継要求を受け付けました"
    );

    let response = state.relay.invoke(call).await?;
    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        warn!(status = status.as_u16(), "プロバイダーが失敗を返しました");
    }

    Ok(match response {
        RelayResponse::Streaming { body, .. } => {
            let mut response = Response::new(Body::from_stream(body));
            *response.status_mut() = status;
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
        RelayResponse::Buffered { payload, .. } => (status, Json(payload)).into_response(),
    })
}
