use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::http_server::identity::Identity;
use crate::object_service::ObjectError;
use crate::ServiceState;

use super::ChangeTokenBody;

pub async fn trash_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeTokenBody>,
) -> Result<impl IntoResponse, ObjectError> {
    let token = body.required()?;
    let trashed = state.objects().delete_object(&caller, id, &token).await?;
    Ok(Json(trashed))
}

pub async fn untrash_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeTokenBody>,
) -> Result<impl IntoResponse, ObjectError> {
    let token = body.required()?;
    let restored = state.objects().untrash_object(&caller, id, &token).await?;
    Ok(Json(restored))
}

pub async fn expunge_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ChangeTokenBody>>,
) -> Result<impl IntoResponse, ObjectError> {
    let token = body.and_then(|Json(b)| b.change_token);
    state
        .objects()
        .expunge_object(&caller, id, token.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "id": id, "expunged": true })))
}
