/**
 * Permission resolution: turns ACM shares, explicit
 *  grants and ownership into a consistent set of
 *  key-carrying permission rows.
 */
pub mod acl;
/**
 * Local ciphertext cache in front of the permanent
 *  store, plus its writeback, eviction and range
 *  pulling machinery.
 */
pub mod cache;
/**
 * Cryptographic types and operations.
 *  - Master, file and IV key material
 *  - Per-grantee key envelopes and their MACs
 *  - AES-CTR streaming with random access
 */
pub mod crypto;
/**
 * Mutation events handed to the event bus.
 */
pub mod events;
/**
 * Label authority capability (ACM validation, rollup,
 *  access checks, user snippets) and an in-memory
 *  evaluator for tests and single-node setups.
 */
pub mod label;
/**
 * Objects, permissions, grantees, ACMs and revisions.
 */
pub mod model;
pub mod version;

pub mod prelude {
    pub use crate::acl::{
        Breadcrumb, Caller, Mutation, PermissionError, PermissionPlan, PermissionResolver,
        ShareGrant,
    };
    pub use crate::cache::{CacheConfig, CacheError, CachePurger, CiphertextCache, RangePuller};
    pub use crate::crypto::{FileKey, KeyEnvelope, MasterKey, StreamIv};
    pub use crate::events::{Event, EventPublisher, MemoryPublisher, TracingPublisher};
    pub use crate::label::{LabelAuthority, LabelError, MemoryLabelAuthority, Snippet};
    pub use crate::model::{
        Acm, Capabilities, ChangeToken, FileId, Object, ObjectFlags, Permission, ResourceString,
        Revision, EVERYONE,
    };
    pub use crate::version::build_info;
}
