use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::prelude::{
    Acm, Breadcrumb, Capabilities, ChangeToken, Object, Permission, ResourceString, Revision,
};

pub const FILE_TYPE: &str = "File";
pub const FOLDER_TYPE: &str = "Folder";

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Metadata half of a create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(default)]
    pub type_name: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub owned_by: Option<ResourceString>,
    pub acm: Acm,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default, rename = "containsUSPersonsData")]
    pub contains_us_persons_data: bool,
    #[serde(default, rename = "exemptFromFOIA")]
    pub exempt_from_foia: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new(name: impl Into<String>, acm: Acm) -> Self {
        Self {
            type_name: None,
            name: name.into(),
            description: String::new(),
            parent_id: None,
            owned_by: None,
            acm,
            content_type: None,
            contains_us_persons_data: false,
            exempt_from_foia: false,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// Property changes. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProperties {
    pub change_token: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acm: Option<Acm>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default, rename = "containsUSPersonsData")]
    pub contains_us_persons_data: Option<bool>,
    #[serde(default, rename = "exemptFromFOIA")]
    pub exempt_from_foia: Option<bool>,
    #[serde(default)]
    pub properties: Option<BTreeMap<String, String>>,
}

impl UpdateProperties {
    pub fn new(change_token: &ChangeToken) -> Self {
        Self {
            change_token: change_token.to_string(),
            ..Self::default()
        }
    }
}

/// One grant in an add/remove share request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectShare {
    pub grantee: ResourceString,
    #[serde(flatten)]
    pub capabilities: Capabilities,
}

/// A permission row as shown to clients. Key material never leaves the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionView {
    pub grantee: String,
    pub resource: ResourceString,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    pub explicit: bool,
    pub acm_share: Option<String>,
}

impl From<&Permission> for PermissionView {
    fn from(row: &Permission) -> Self {
        Self {
            grantee: row.grantee.clone(),
            resource: row.resource.clone(),
            capabilities: row.capabilities,
            explicit: row.explicit,
            acm_share: row.acm_share.clone(),
        }
    }
}

/// Object metadata plus what the caller may do with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResponse {
    #[serde(flatten)]
    pub object: Object,
    pub caller_permission: Capabilities,
    pub permissions: Vec<PermissionView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<Breadcrumb>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paging {
    /// 1-based
    pub page_number: u32,
    pub page_size: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Paging {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
        }
    }

    fn normalized(&self) -> (usize, usize) {
        let size = self.page_size.clamp(1, MAX_PAGE_SIZE) as usize;
        let number = self.page_number.max(1) as usize;
        (number, size)
    }

    pub(crate) fn page<T>(&self, items: Vec<T>) -> Page<T> {
        let (page_number, page_size) = self.normalized();
        let total_rows = items.len();
        let objects = items
            .into_iter()
            .skip((page_number - 1) * page_size)
            .take(page_size)
            .collect::<Vec<_>>();
        Page {
            total_rows,
            page_number: page_number as u32,
            page_size: page_size as u32,
            page_rows: objects.len(),
            objects,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_rows: usize,
    pub page_number: u32,
    pub page_size: u32,
    pub page_rows: usize,
    pub objects: Vec<T>,
}

/// Listing entry: the object and the caller's capabilities on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    #[serde(flatten)]
    pub object: Object,
    pub caller_permission: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSummary {
    pub change_count: i64,
    pub change_token: ChangeToken,
    pub name: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub modified_by: String,
    pub modified_date: DateTime<Utc>,
}

impl From<&Revision> for RevisionSummary {
    fn from(rev: &Revision) -> Self {
        Self {
            change_count: rev.change_count,
            change_token: rev.change_token.clone(),
            name: rev.name.clone(),
            content_length: rev.content_length,
            content_type: rev.content_type.clone(),
            content_hash: rev.content_hash.clone(),
            modified_by: rev.modified_by.clone(),
            modified_date: rev.modified_date,
        }
    }
}

/// A group the caller belongs to and how many objects it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpace {
    pub grantee: String,
    pub resource_string: ResourceString,
    pub display_name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipRequest {
    pub object_ids: Vec<Uuid>,
    #[serde(default = "default_zip_name")]
    pub file_name: String,
    #[serde(default = "default_disposition")]
    pub disposition: String,
}

fn default_zip_name() -> String {
    "drive.zip".to_string()
}

fn default_disposition() -> String {
    "attachment".to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_paging_clamps() {
        let page = Paging::new(0, 0).page((0..5).collect::<Vec<_>>());
        assert_eq!(page.page_number, 1);
        assert_eq!(page.page_size, 1);
        assert_eq!(page.objects, vec![0]);
        assert_eq!(page.total_rows, 5);

        let page = Paging::new(2, 2).page((0..5).collect::<Vec<_>>());
        assert_eq!(page.objects, vec![2, 3]);

        let page = Paging::new(9, 2).page((0..5).collect::<Vec<_>>());
        assert!(page.objects.is_empty());
        assert_eq!(page.page_rows, 0);
    }

    #[test]
    fn test_share_request_shape() {
        let share: ObjectShare = serde_json::from_value(json!({
            "grantee": "user/CN=bob",
            "allowRead": true,
            "allowUpdate": true
        }))
        .unwrap();
        assert_eq!(share.grantee, ResourceString::user("CN=bob"));
        assert_eq!(share.capabilities, Capabilities::READ | Capabilities::UPDATE);
    }

    #[test]
    fn test_metadata_defaults() {
        let meta: ObjectMetadata = serde_json::from_value(json!({
            "name": "report.txt",
            "acm": {"classif": "U"}
        }))
        .unwrap();
        assert!(meta.parent_id.is_none());
        assert!(meta.owned_by.is_none());
        assert!(!meta.contains_us_persons_data);
    }
}
