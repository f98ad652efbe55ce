use std::io;

use axum::extract::{FromRequest, Json, Multipart, Request, State};
use axum::response::IntoResponse;
use futures::TryStreamExt;
use http::header::CONTENT_TYPE;
use tokio_util::io::StreamReader;

use crate::http_server::identity::Identity;
use crate::object_service::{ObjectError, ObjectMetadata};
use crate::ServiceState;

use super::{next_filestream, read_metadata};

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

/// Create a folder from a JSON body, or a file from `ObjectMetadata` +
/// `filestream` multipart parts.
pub async fn handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    request: Request,
) -> Result<impl IntoResponse, ObjectError> {
    if !is_multipart(&request) {
        let Json(metadata) = Json::<ObjectMetadata>::from_request(request, &state)
            .await
            .map_err(|e| ObjectError::BadRequest(e.body_text()))?;
        tracing::info!(actor = %caller.dn, name = %metadata.name, "create object");
        let created = state.objects().create_object(&caller, metadata, None).await?;
        return Ok(Json(created));
    }

    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| ObjectError::BadRequest(e.body_text()))?;
    let mut metadata: ObjectMetadata = read_metadata(&mut multipart).await?;
    tracing::info!(actor = %caller.dn, name = %metadata.name, "create object with content");

    let created = match next_filestream(&mut multipart).await? {
        Some(field) => {
            if metadata.content_type.is_none() {
                metadata.content_type = field.content_type().map(str::to_string);
            }
            let reader = StreamReader::new(field.map_err(io::Error::other));
            let mut reader = std::pin::pin!(reader);
            state
                .objects()
                .create_object(&caller, metadata, Some(&mut reader))
                .await?
        }
        None => state.objects().create_object(&caller, metadata, None).await?,
    };
    Ok(Json(created))
}
