use std::io;

use axum::body::Body;
use axum::extract::{FromRequest, Json, Multipart, Path, Request, State};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, ETAG,
};
use http::StatusCode;
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

use crate::http_server::identity::Identity;
use crate::http_server::range::{etag, not_modified, parse_range, ByteRange, RangeRequest};
use crate::object_service::{ContentHandle, ObjectError};
use crate::ServiceState;

use super::{next_filestream, read_metadata, ChangeTokenBody};

const OCTET_STREAM: &str = "application/octet-stream";

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "dropping header with invalid value"),
    }
}

/// Decrypted content of `handle`, honoring `Range` and `If-None-Match`.
pub fn content_response(state: &ServiceState, handle: ContentHandle, request: &HeaderMap) -> Response {
    let tag = etag(handle.object_id, &handle.change_token);
    if not_modified(request, &tag) {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        set_header(response.headers_mut(), ETAG, &tag);
        return response;
    }

    let length = handle.length;
    let (status, range) = match parse_range(request, length) {
        RangeRequest::Full => (StatusCode::OK, ByteRange { start: 0, stop: length }),
        RangeRequest::Partial(range) => (StatusCode::PARTIAL_CONTENT, range),
        RangeRequest::Unsatisfiable => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            set_header(response.headers_mut(), CONTENT_RANGE, &format!("bytes */{length}"));
            return response;
        }
    };

    let content_type = handle
        .content_type
        .clone()
        .unwrap_or_else(|| OCTET_STREAM.to_string());
    let disposition = format!("inline; filename=\"{}\"", handle.name.replace('"', "'"));
    let pipe = state.objects().stream_range(handle, range.start, range.stop);

    let mut response = Response::new(Body::from_stream(ReaderStream::new(pipe)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    set_header(headers, CONTENT_TYPE, &content_type);
    set_header(headers, CONTENT_DISPOSITION, &disposition);
    set_header(headers, ETAG, &tag);
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(range.len()));
    if status == StatusCode::PARTIAL_CONTENT {
        set_header(headers, CONTENT_RANGE, &range.content_range(length));
    }
    response
}

pub async fn get_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ObjectError> {
    let handle = state.objects().open_content(&caller, id).await?;
    Ok(content_response(&state, handle, &headers))
}

/// Replace the stream. The metadata part carries the current `changeToken`.
pub async fn update_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    request: Request,
) -> Result<impl IntoResponse, ObjectError> {
    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| ObjectError::BadRequest(e.body_text()))?;
    let token = read_metadata::<ChangeTokenBody>(&mut multipart)
        .await?
        .required()?;
    let field = next_filestream(&mut multipart)
        .await?
        .ok_or_else(|| ObjectError::BadRequest("missing filestream part".to_string()))?;

    tracing::info!(actor = %caller.dn, object_id = %id, "update stream");
    let reader = StreamReader::new(field.map_err(io::Error::other));
    let mut reader = std::pin::pin!(reader);
    let updated = state
        .objects()
        .update_stream(&caller, id, &token, &mut reader)
        .await?;
    Ok(Json(updated))
}
