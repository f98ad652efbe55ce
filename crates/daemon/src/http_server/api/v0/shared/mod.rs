use axum::extract::{Json, Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use uuid::Uuid;

use crate::http_server::identity::Identity;
use crate::object_service::{ObjectError, ObjectShare, Paging};
use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/", get(list_handler))
        .route("/:id", post(add_handler).delete(remove_handler))
        .with_state(state)
}

/// Objects shared with the caller.
pub async fn list_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ObjectError> {
    Ok(Json(state.objects().list_shared(&caller, paging).await?))
}

pub async fn add_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Json(share): Json<ObjectShare>,
) -> Result<impl IntoResponse, ObjectError> {
    tracing::info!(actor = %caller.dn, object_id = %id, grantee = %share.grantee, "add share");
    Ok(Json(state.objects().add_share(&caller, id, share).await?))
}

pub async fn remove_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
    Json(share): Json<ObjectShare>,
) -> Result<impl IntoResponse, ObjectError> {
    tracing::info!(actor = %caller.dn, object_id = %id, grantee = %share.grantee, "remove share");
    Ok(Json(state.objects().remove_share(&caller, id, share).await?))
}
