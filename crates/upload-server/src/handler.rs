//! Request handlers.
//!
//! Each handler pulls the transfer metadata out of the request headers and
//! hands it to the shared [`ChunkReceiver`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt, stream};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use chunkyard_protocol::constants::{
    DEFAULT_FILENAME, HEADER_FILENAME, HEADER_UPLOAD_STATUS, MSG_CHUNK_ACCEPTED,
    MSG_UPLOAD_COMPLETE,
};
use chunkyard_protocol::ChunkStatus;
use chunkyard_transfer::{ChunkOutcome, ChunkReceiver, ChunkRequest, TransferError};

use crate::ApiError;

#[derive(Clone)]
pub(crate) struct AppState {
    pub receiver: Arc<ChunkReceiver>,
    pub body_timeout: Duration,
}

/// `POST /upload`: stores one chunk.
pub(crate) async fn upload_chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let request = ChunkRequest {
        identifier: filename(&headers)?,
        content_range: header_str(&headers, header::CONTENT_RANGE.as_str())
            .map_err(TransferError::InvalidRangeFormat)?,
        content_length: content_length(&headers),
        body: body_reader(body.into_data_stream(), state.body_timeout),
    };

    let outcome = state.receiver.receive_chunk(request).await?;
    let message = match outcome {
        ChunkOutcome::Partial(_) => MSG_CHUNK_ACCEPTED,
        ChunkOutcome::Complete(_) => MSG_UPLOAD_COMPLETE,
    };
    Ok((
        StatusCode::OK,
        [(HEADER_UPLOAD_STATUS, outcome.status().as_str())],
        message,
    )
        .into_response())
}

/// `GET /upload/status`: reports progress of an in-flight transfer.
pub(crate) async fn upload_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identifier = identifier(&headers)?;
    match state.receiver.progress(&identifier).await {
        Some(progress) => Ok(Json(progress).into_response()),
        None => Err(TransferError::NoActiveUpload(identifier).into()),
    }
}

/// `POST /upload/complete`: finalizes a transfer explicitly.
pub(crate) async fn finalize_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identifier = identifier(&headers)?;
    let progress = state.receiver.finalize(&identifier).await?;
    Ok((
        [(HEADER_UPLOAD_STATUS, ChunkStatus::Complete.as_str())],
        Json(progress),
    )
        .into_response())
}

fn identifier(headers: &HeaderMap) -> Result<String, TransferError> {
    Ok(filename(headers)?.unwrap_or_else(|| DEFAULT_FILENAME.to_string()))
}

/// Reads the file identifier. Unlike other headers it may carry any UTF-8
/// text, so names like `résumé.pdf` are accepted.
fn filename(headers: &HeaderMap) -> Result<Option<String>, TransferError> {
    match headers.get(HEADER_FILENAME) {
        None => Ok(None),
        Some(value) => String::from_utf8(value.as_bytes().to_vec())
            .map(Some)
            .map_err(|_| {
                TransferError::InvalidPath(format!("{HEADER_FILENAME} is not UTF-8: {value:?}"))
            }),
    }
}

/// Reads a header as text. A value that is not visible ASCII is returned as
/// the error so the caller can wrap it in the right variant.
fn header_str(headers: &HeaderMap, name: &str) -> Result<Option<String>, String> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.to_string()))
            .map_err(|_| format!("{name} is not valid text: {value:?}")),
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Adapts a body stream to [`AsyncRead`], failing with
/// [`io::ErrorKind::TimedOut`] when no data arrives for `idle`.
fn body_reader<S, E>(body: S, idle: Duration) -> impl AsyncRead + Unpin + Send
where
    S: Stream<Item = Result<axum::body::Bytes, E>> + Unpin + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let timed = stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(item)) => Some((item.map_err(io::Error::other), Some(body))),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no body data for {}s", idle.as_secs_f32()),
                )),
                None,
            )),
        }
    });
    StreamReader::new(Box::pin(timed))
}
