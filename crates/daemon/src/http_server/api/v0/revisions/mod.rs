use axum::extract::{Json, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::HeaderMap;
use uuid::Uuid;

use crate::http_server::identity::Identity;
use crate::object_service::ObjectError;
use crate::ServiceState;

use super::objects::stream::content_response;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/:id", get(list_handler))
        .route("/:id/:version/stream", get(stream_handler))
        .with_state(state)
}

pub async fn list_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ObjectError> {
    let revisions = state.objects().list_revisions(&caller, id).await?;
    Ok(Json(revisions))
}

pub async fn stream_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path((id, version)): Path<(Uuid, i64)>,
    headers: HeaderMap,
) -> Result<Response, ObjectError> {
    let handle = state
        .objects()
        .open_revision_content(&caller, id, version)
        .await?;
    Ok(content_response(&state, handle, &headers))
}
