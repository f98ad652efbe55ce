use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::acm::Acm;
use super::file_id::FileId;
use super::grantee::ResourceString;
use crate::crypto::StreamIv;

/// Opaque 128-bit random value rotated on every mutation.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(String);

impl ChangeToken {
    pub fn generate() -> Self {
        let mut buff = [0u8; 16];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(hex::encode(buff))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a token echoed back by a client.
    pub fn matches(&self, supplied: &str) -> bool {
        self.0.eq_ignore_ascii_case(supplied.trim())
    }
}

impl From<String> for ChangeToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFlags {
    pub is_deleted: bool,
    pub is_ancestor_deleted: bool,
    pub is_expunged: bool,
    #[serde(rename = "containsUSPersonsData")]
    pub contains_us_persons_data: bool,
    #[serde(rename = "exemptFromFOIA")]
    pub exempt_from_foia: bool,
}

impl ObjectFlags {
    /// Trashed directly or through an ancestor.
    pub fn in_trash(&self) -> bool {
        self.is_deleted || self.is_ancestor_deleted
    }
}

/// A logical object as stored in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    pub id: Uuid,
    pub type_name: String,
    pub name: String,
    pub description: String,
    pub parent_id: Option<Uuid>,
    pub owned_by: ResourceString,
    pub acm: Acm,
    pub content_connector: Option<FileId>,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub encrypt_iv: Option<StreamIv>,
    pub change_token: ChangeToken,
    pub change_count: i64,
    pub created_by: String,
    pub created_date: DateTime<Utc>,
    pub modified_by: String,
    pub modified_date: DateTime<Utc>,
    #[serde(flatten)]
    pub flags: ObjectFlags,
    pub properties: BTreeMap<String, String>,
}

impl Object {
    pub fn has_content(&self) -> bool {
        self.content_length > 0 && self.content_connector.is_some()
    }

    /// Rotate the change token and bump the change count.
    pub fn touch(&mut self, actor: &str) {
        self.change_token = ChangeToken::generate();
        self.change_count += 1;
        self.modified_by = actor.to_string();
        self.modified_date = Utc::now();
    }

    pub fn revision(&self) -> Revision {
        Revision {
            object_id: self.id,
            change_count: self.change_count,
            change_token: self.change_token.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            parent_id: self.parent_id,
            owned_by: self.owned_by.clone(),
            acm: self.acm.clone(),
            content_connector: self.content_connector,
            content_length: self.content_length,
            content_type: self.content_type.clone(),
            content_hash: self.content_hash.clone(),
            encrypt_iv: self.encrypt_iv,
            modified_by: self.modified_by.clone(),
            modified_date: self.modified_date,
            flags: self.flags,
        }
    }
}

/// Append-only snapshot of an object after one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub object_id: Uuid,
    pub change_count: i64,
    pub change_token: ChangeToken,
    pub name: String,
    pub description: String,
    pub parent_id: Option<Uuid>,
    pub owned_by: ResourceString,
    pub acm: Acm,
    pub content_connector: Option<FileId>,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub encrypt_iv: Option<StreamIv>,
    pub modified_by: String,
    pub modified_date: DateTime<Utc>,
    #[serde(flatten)]
    pub flags: ObjectFlags,
}
