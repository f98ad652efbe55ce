/**
 * SQLite metadata store: objects, permission rows,
 *  revisions and the schema version marker.
 */
pub mod database;
/**
 * HTTP surface: caller identity, object, share,
 *  listing and export routes plus health probes.
 */
pub mod http_server;
/**
 * Graceful shutdown of the storage side: stop
 *  registrations, drain writeback, stop the purger.
 */
pub mod lifecycle;
/**
 * Object operations over metadata, permissions
 *  and encrypted content.
 */
pub mod object_service;
pub mod process;
pub mod service_config;
pub mod service_state;

// App state (configuration, paths)
pub mod state;

pub use process::{spawn_service, start_service, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use service_state::State as ServiceState;
pub use state::{AppConfig, AppState, StateError};
