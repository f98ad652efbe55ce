use axum::extract::{Json, Path, Query, State};
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::http_server::identity::Identity;
use crate::object_service::{ObjectError, Paging};
use crate::ServiceState;

pub async fn handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ObjectError> {
    let page = state.objects().list_children(&caller, Some(id), paging).await?;
    Ok(Json(page))
}

pub async fn root_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ObjectError> {
    let page = state.objects().list_children(&caller, None, paging).await?;
    Ok(Json(page))
}
