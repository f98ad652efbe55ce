mod resolver;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{CryptoError, FileKey, MasterKey};
use crate::label::{LabelError, Snippet};
use crate::model::{flatten, Capabilities, Permission, ResourceString, EVERYONE};

pub use resolver::{Mutation, PermissionPlan, PermissionResolver, ShareGrant};

/// Name shown for breadcrumbs the caller may not read.
pub const REDACTED_NAME: &str = "Not Authorized";

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("acm invalid: {0}")]
    AcmInvalid(String),
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("invalid owner: {0}")]
    InvalidOwner(String),
    #[error("label authority error: {0}")]
    Label(LabelError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<LabelError> for PermissionError {
    fn from(err: LabelError) -> Self {
        match err {
            LabelError::Invalid(msg) => PermissionError::AcmInvalid(msg),
            other => PermissionError::Label(other),
        }
    }
}

/// An authenticated principal and the grantee keys it satisfies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub dn: String,
    pub grantees: BTreeSet<String>,
    pub groups: Vec<ResourceString>,
}

impl Caller {
    /// Build from the label authority's snippet for `dn`. The caller always
    /// satisfies its own flattened DN and `-Everyone`.
    pub fn from_snippet(dn: impl Into<String>, snippet: Snippet) -> Self {
        let dn = dn.into();
        let mut grantees = snippet.f_share;
        grantees.insert(flatten(&dn));
        grantees.insert(EVERYONE.to_string());
        Self {
            dn,
            grantees,
            groups: snippet.groups,
        }
    }

    /// A caller known only by DN, with no group memberships.
    pub fn user(dn: impl Into<String>) -> Self {
        Self::from_snippet(dn, Snippet::default())
    }

    pub fn resource(&self) -> ResourceString {
        ResourceString::user(self.dn.clone())
    }

    pub fn grantee(&self) -> String {
        flatten(&self.dn)
    }

    pub fn holds(&self, grantee: &str) -> bool {
        self.grantees.contains(grantee)
    }

    /// Whether the caller is, or is a member of, `resource`.
    pub fn is(&self, resource: &ResourceString) -> bool {
        self.holds(&resource.grantee())
    }

    /// Union of capabilities over MAC-valid rows this caller holds.
    pub fn capabilities(&self, master: &MasterKey, rows: &[Permission]) -> Capabilities {
        rows.iter()
            .filter(|row| self.holds(&row.grantee) && row.is_valid(master))
            .fold(Capabilities::NONE, |acc, row| acc | row.capabilities)
    }

    /// Unwrap the file key through any MAC-valid row the caller holds that
    /// carries `needed`.
    pub fn file_key(
        &self,
        master: &MasterKey,
        rows: &[Permission],
        needed: Capabilities,
    ) -> Result<FileKey, PermissionError> {
        for row in rows {
            if !self.holds(&row.grantee) || !row.capabilities.contains(needed) {
                continue;
            }
            match row.file_key(master) {
                Ok(key) => return Ok(key),
                Err(e) => {
                    tracing::warn!(permission_id = %row.id, grantee = %row.grantee, error = %e, "ignoring permission row");
                }
            }
        }
        Err(PermissionError::Denied(format!(
            "{} lacks {needed} on the object",
            self.dn
        )))
    }
}

/// One ancestor in a properties response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
}

impl Breadcrumb {
    /// Hide the name but keep the path skeleton.
    pub fn redacted(self) -> Self {
        Self {
            name: REDACTED_NAME.to_string(),
            ..self
        }
    }
}
