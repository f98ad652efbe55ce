use axum::extract::{Json, Path, Query, State};
use axum::response::IntoResponse;

use crate::http_server::identity::Identity;
use crate::object_service::{ObjectError, Paging};
use crate::ServiceState;

/// Caller-owned objects shared with others.
pub async fn shares_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ObjectError> {
    Ok(Json(state.objects().list_shares(&caller, paging).await?))
}

pub async fn public_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ObjectError> {
    Ok(Json(state.objects().list_shared_public(&caller, paging).await?))
}

pub async fn trashed_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ObjectError> {
    Ok(Json(state.objects().list_trashed(&caller, paging).await?))
}

pub async fn groups_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
) -> Result<impl IntoResponse, ObjectError> {
    Ok(Json(state.objects().list_groups(&caller).await?))
}

pub async fn search_handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path(query): Path<String>,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ObjectError> {
    Ok(Json(state.objects().search(&caller, &query, paging).await?))
}
