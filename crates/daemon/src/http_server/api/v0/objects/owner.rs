use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use uuid::Uuid;

use common::prelude::ResourceString;

use crate::http_server::identity::Identity;
use crate::object_service::ObjectError;
use crate::ServiceState;

use super::ChangeTokenBody;

/// `resource` is a full resource string such as `user/<dn>` or
/// `group/<project>/<display>/<group>`.
pub async fn handler(
    State(state): State<ServiceState>,
    Identity(caller): Identity,
    Path((id, resource)): Path<(Uuid, String)>,
    body: Option<Json<ChangeTokenBody>>,
) -> Result<impl IntoResponse, ObjectError> {
    let owner: ResourceString = resource
        .trim_start_matches('/')
        .parse()
        .map_err(|e| ObjectError::InvalidOwner(format!("{resource}: {e}")))?;
    let token = body.and_then(|Json(b)| b.change_token);
    let changed = state
        .objects()
        .change_owner(&caller, id, owner, token.as_deref())
        .await?;
    Ok(Json(changed))
}
