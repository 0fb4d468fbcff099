use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use axum_extra::extract::WithRejection;
use futures_util::StreamExt;

use colloquy_types::api::{CompletionRequest, DeleteChatQuery, PostRequestBody};

use crate::error::ChatError;
use crate::hub::FrameStream;
use crate::middleware::Identity;
use crate::state::AppState;

const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";

/// `POST /api/chat`: submit a user turn and stream the answer.
pub async fn post_chat(
    State(state): State<AppState>,
    Identity(identity): Identity,
    WithRejection(Json(body), _): WithRejection<Json<PostRequestBody>, ChatError>,
) -> Result<Response, ChatError> {
    let turn = state.orchestrator.submit(identity.as_ref(), body).await?;
    Ok(sse_response(turn.frames, state.max_duration))
}

/// `DELETE /api/chat?id=`
pub async fn delete_chat(
    State(state): State<AppState>,
    Identity(identity): Identity,
    Query(query): Query<DeleteChatQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let id = query
        .id
        .ok_or_else(|| ChatError::BadRequest("missing chat id".into()))?;
    let chat = state.orchestrator.delete_chat(identity.as_ref(), &id).await?;
    Ok(Json(chat))
}

/// `GET /api/chat/{id}`
pub async fn get_chat(
    State(state): State<AppState>,
    Identity(identity): Identity,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    let chat = state.orchestrator.load_chat(identity.as_ref(), &id).await?;
    Ok(Json(chat))
}

/// `GET /api/chat/{id}/stream`: re-attach to the latest stream of a chat.
/// Replay starts after the frame named by `Last-Event-ID`, or at the beginning.
pub async fn resume_stream(
    State(state): State<AppState>,
    Identity(identity): Identity,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ChatError> {
    let from = resume_offset(&headers)?;
    match state.orchestrator.resume(identity.as_ref(), &id, from).await? {
        Some(frames) => Ok(sse_response(frames, state.max_duration)),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `POST /api/completion`: stateless answer over a message list.
pub async fn post_completion(
    State(state): State<AppState>,
    Identity(identity): Identity,
    WithRejection(Json(request), _): WithRejection<Json<CompletionRequest>, ChatError>,
) -> Result<Response, ChatError> {
    let turn = state.orchestrator.complete(identity.as_ref(), request).await?;
    Ok(sse_response(turn.frames, state.max_duration))
}

pub async fn health() -> &'static str {
    "ok"
}

fn resume_offset(headers: &HeaderMap) -> Result<u64, ChatError> {
    let Some(value) = headers.get("last-event-id") else {
        return Ok(0);
    };
    let last: u64 = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ChatError::BadStream("Last-Event-ID must be a frame offset".into()))?;
    last.checked_add(1)
        .ok_or_else(|| ChatError::BadStream("Last-Event-ID is past the end of any stream".into()))
}

/// Frames as Server-Sent Events; each event id is the frame offset.
///
/// The body ends once `ceiling` has elapsed even if the stream is still live.
/// Generation runs on its own task and is not affected.
pub fn sse_response(frames: FrameStream, ceiling: Duration) -> Response {
    let events = frames
        .take_until(tokio::time::sleep(ceiling))
        .map(|frame| Ok::<_, Infallible>(Event::default().id(frame.offset.to_string()).data(&*frame.data)));
    let mut response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(STREAM_PROTOCOL_HEADER),
        HeaderValue::from_static("v1"),
    );
    response
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::hub::StreamHub;

    #[test]
    fn last_event_id_resumes_after_that_frame() {
        let mut headers = HeaderMap::new();
        assert_eq!(resume_offset(&headers).unwrap(), 0);
        headers.insert("last-event-id", HeaderValue::from_static("4"));
        assert_eq!(resume_offset(&headers).unwrap(), 5);
        headers.insert("last-event-id", HeaderValue::from_static("four"));
        assert_eq!(resume_offset(&headers).unwrap_err().code(), "bad_request:stream");
        headers.insert("last-event-id", HeaderValue::from_static("18446744073709551615"));
        assert_eq!(resume_offset(&headers).unwrap_err().code(), "bad_request:stream");
    }

    #[tokio::test]
    async fn body_stops_at_the_ceiling_while_the_stream_stays_live() {
        let hub = StreamHub::new();
        let publisher = hub.open("s1").await;
        publisher.publish("first");
        let frames = hub.subscribe("s1", 0).await.unwrap();

        let response = sse_response(frames, Duration::from_millis(50));
        let body = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
            .await
            .expect("body outlived its ceiling")
            .unwrap()
            .to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("data: first") || body.contains("data:first"));

        // The publisher is untouched; later frames still land for resuming readers.
        assert_eq!(publisher.publish("second"), 1);
        assert!(hub.contains("s1").await);
    }
}
