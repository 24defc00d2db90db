use crate::latency::publisher::{drive_stream_session, ChannelSink, StreamSession};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One independent session per request. Dropping the response body closes the
/// channel, which the session observes as a client disconnect.
pub async fn latency_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (sender, receiver) = mpsc::unbounded_channel::<Bytes>();
    let session = StreamSession::new(
        Arc::clone(&state.producer),
        ChannelSink::new(sender),
        state.stream_config,
    );
    let open_stream = state.track_stream();
    let cancel_token = state.shutdown.child_token();

    tracing::info!(
        service = "latency-stream",
        open_streams = state.open_streams(),
        "stream-opened"
    );
    tokio::spawn(async move {
        let _open_stream = open_stream;
        drive_stream_session(session, cancel_token).await;
    });

    let body = Body::from_stream(
        UnboundedReceiverStream::new(receiver).map(Ok::<Bytes, std::io::Error>),
    );

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-store"),
            (CONNECTION, "keep-alive"),
        ],
        body,
    )
}
