use axum::routing::{get, post};
use axum::Router;

pub mod archive;
pub mod listing;
pub mod objects;
pub mod revisions;
pub mod shared;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .nest("/objects", objects::router(state.clone()))
        .nest("/revisions", revisions::router(state.clone()))
        .nest("/shared", shared::router(state.clone()))
        .route("/shares", get(listing::shares_handler))
        .route("/sharedpublic", get(listing::public_handler))
        .route("/trashed", get(listing::trashed_handler))
        .route("/groups", get(listing::groups_handler))
        .route("/search/:query", get(listing::search_handler))
        .route("/zip", post(archive::handler))
        .with_state(state)
}
