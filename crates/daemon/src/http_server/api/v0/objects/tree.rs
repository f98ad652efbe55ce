use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::http_server::identity::Identity;
use crate::object_service::ObjectError;
use crate::ServiceState;

use super::ChangeTokenBody;

pub async fn move_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path((id, parent_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<ChangeTokenBody>>,
) -> Result<impl IntoResponse, ObjectError> {
    let token = body.and_then(|Json(b)| b.change_token);
    let moved = state
        .objects()
        .move_object(&caller, id, Some(parent_id), token.as_deref())
        .await?;
    Ok(Json(moved))
}

pub async fn move_to_root_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ChangeTokenBody>>,
) -> Result<impl IntoResponse, ObjectError> {
    let token = body.and_then(|Json(b)| b.change_token);
    let moved = state
        .objects()
        .move_object(&caller, id, None, token.as_deref())
        .await?;
    Ok(Json(moved))
}
