use axum::extract::multipart::{Field, Multipart};
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub mod children;
pub mod create;
pub mod owner;
pub mod properties;
pub mod stream;
pub mod trash;
pub mod tree;

use crate::object_service::ObjectError;
use crate::ServiceState;

/// Multipart part carrying the JSON metadata.
pub const METADATA_PART: &str = "ObjectMetadata";
/// Multipart part carrying the plaintext.
pub const FILESTREAM_PART: &str = "filestream";

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/", post(create::handler).get(children::root_handler))
        .route("/:id/children", get(children::handler))
        .route(
            "/:id/properties",
            get(properties::get_handler).post(properties::update_handler),
        )
        .route(
            "/:id/stream",
            get(stream::get_handler).post(stream::update_handler),
        )
        .route("/:id/trash", post(trash::trash_handler))
        .route("/:id/untrash", post(trash::untrash_handler))
        .route("/:id/expunge", post(trash::expunge_handler))
        .route("/:id/move", post(tree::move_to_root_handler))
        .route("/:id/move/:parent_id", post(tree::move_handler))
        .route("/:id/owner/*resource", post(owner::handler))
        .with_state(state)
}

/// Optional body of the tree mutations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTokenBody {
    #[serde(default)]
    pub change_token: Option<String>,
}

impl ChangeTokenBody {
    pub fn required(self) -> Result<String, ObjectError> {
        self.change_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ObjectError::BadRequest("changeToken is required".to_string()))
    }
}

fn bad_part(e: impl std::fmt::Display) -> ObjectError {
    ObjectError::BadRequest(format!("malformed multipart body: {e}"))
}

/// Read the leading metadata part of a multipart body.
pub async fn read_metadata<T: DeserializeOwned>(
    multipart: &mut Multipart,
) -> Result<T, ObjectError> {
    let field = multipart
        .next_field()
        .await
        .map_err(bad_part)?
        .ok_or_else(|| ObjectError::BadRequest(format!("missing {METADATA_PART} part")))?;
    if field.name() != Some(METADATA_PART) {
        return Err(ObjectError::BadRequest(format!(
            "expected {METADATA_PART} part first, got {:?}",
            field.name()
        )));
    }
    let bytes = field.bytes().await.map_err(bad_part)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ObjectError::BadRequest(format!("invalid {METADATA_PART}: {e}")))
}

/// The file part following the metadata, if any.
pub async fn next_filestream<'a>(
    multipart: &'a mut Multipart,
) -> Result<Option<Field<'a>>, ObjectError> {
    match multipart.next_field().await.map_err(bad_part)? {
        Some(field) if field.name() == Some(FILESTREAM_PART) => Ok(Some(field)),
        Some(field) => Err(ObjectError::BadRequest(format!(
            "unexpected part {:?}",
            field.name()
        ))),
        None => Ok(None),
    }
}
