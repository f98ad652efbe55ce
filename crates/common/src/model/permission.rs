use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::capabilities::Capabilities;
use super::grantee::ResourceString;
use crate::crypto::{CryptoError, FileKey, KeyEnvelope, MasterKey};

/// One (object, grantee) row carrying a capability set and the wrapped file key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: Uuid,
    pub object_id: Uuid,
    pub grantee: String,
    pub resource: ResourceString,
    pub capabilities: Capabilities,
    /// Share fragment this row was derived from, for ACM-derived rows.
    pub acm_share: Option<String>,
    pub explicit: bool,
    #[serde(skip)]
    pub envelope: KeyEnvelope,
    pub created_by: String,
    pub created_date: DateTime<Utc>,
}

impl Permission {
    /// Build a new row wrapping `file_key` for `resource`.
    pub fn grant(
        master: &MasterKey,
        object_id: Uuid,
        resource: ResourceString,
        capabilities: Capabilities,
        file_key: &FileKey,
        created_by: &str,
    ) -> Self {
        let grantee = resource.grantee();
        let envelope = KeyEnvelope::seal(master, &grantee, capabilities, object_id, file_key);
        Self {
            id: Uuid::new_v4(),
            object_id,
            grantee,
            resource,
            capabilities,
            acm_share: None,
            explicit: false,
            envelope,
            created_by: created_by.to_string(),
            created_date: Utc::now(),
        }
    }

    pub fn is_valid(&self, master: &MasterKey) -> bool {
        self.envelope
            .verify(master, &self.grantee, self.capabilities, self.object_id)
    }

    /// Verify the row's MAC and unwrap the file key.
    pub fn file_key(&self, master: &MasterKey) -> Result<FileKey, CryptoError> {
        self.envelope
            .open(master, &self.grantee, self.capabilities, self.object_id)
    }
}
