//! The label authority: ACM validation, rollup, access checks and user snippets.

mod memory;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{Acm, ResourceString};

pub use memory::{Classification, MemoryLabelAuthority, UserProfile};

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("acm rejected: {0}")]
    Invalid(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("label authority unavailable: {0}")]
    Unavailable(String),
}

/// How share blocks combine in a rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    /// Readers of any input can read the result.
    Union,
    /// Only readers of every input can read the result.
    Intersection,
}

/// What the authority knows about one user, flattened for matching.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snippet {
    pub dn: String,
    /// Flattened share values the user satisfies: their own grantee plus one
    /// per group membership.
    pub f_share: BTreeSet<String>,
    pub groups: Vec<ResourceString>,
}

/// Capability set of the external label evaluator. Safe for concurrent use.
#[async_trait::async_trait]
pub trait LabelAuthority: Send + Sync + std::fmt::Debug {
    /// Check `acm` is well formed for `dn` and return it normalized, with
    /// `f_share` recomputed from `share`.
    async fn validate(&self, dn: &str, acm: &Acm) -> Result<Acm, LabelError>;

    /// Combine several ACMs into one marking for a bundle.
    async fn rollup(&self, dn: &str, acms: &[Acm], share_type: ShareType)
        -> Result<Acm, LabelError>;

    /// Whether `dn` may see content marked with `acm`.
    async fn check_access(&self, dn: &str, acm: &Acm) -> Result<bool, LabelError>;

    async fn snippet(&self, dn: &str) -> Result<Snippet, LabelError>;
}
