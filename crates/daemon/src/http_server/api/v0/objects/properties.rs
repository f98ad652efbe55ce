use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::http_server::identity::Identity;
use crate::object_service::{ObjectError, UpdateProperties};
use crate::ServiceState;

pub async fn get_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ObjectError> {
    let props = state.objects().get_properties(&caller, id).await?;
    Ok(Json(props))
}

pub async fn update_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateProperties>,
) -> Result<impl IntoResponse, ObjectError> {
    tracing::info!(actor = %caller.dn, object_id = %id, "update properties");
    let updated = state.objects().update_properties(&caller, id, update).await?;
    Ok(Json(updated))
}
