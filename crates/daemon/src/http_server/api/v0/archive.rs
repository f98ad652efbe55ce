use axum::body::Body;
use axum::extract::{Json, State};
use axum::response::Response;
use http::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::io::ReaderStream;

use crate::http_server::identity::Identity;
use crate::object_service::{ObjectError, ZipRequest};
use crate::ServiceState;

/// Bundle the requested files into one archive.
pub async fn handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Json(request): Json<ZipRequest>,
) -> Result<Response, ObjectError> {
    let export = state.objects().zip_export(&caller, request).await?;

    let disposition = format!(
        "{}; filename=\"{}\"",
        export.disposition,
        export.file_name.replace('"', "'")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| ObjectError::BadRequest("invalid file name or disposition".to_string()))?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(export.file)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(CONTENT_DISPOSITION, disposition);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(export.length));
    Ok(response)
}
