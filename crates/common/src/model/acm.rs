//! Access-control metadata.
//!
//! The ACM is an opaque JSON document as far as storage is concerned. The
//! helpers here only look at the handful of fields the permission model and
//! the zip manifest need: `classif`, `banner`, `portion`, `share` and
//! `f_share`. Everything else passes through untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::grantee::ResourceString;

#[derive(Debug, thiserror::Error)]
pub enum AcmError {
    #[error("acm must be a json object")]
    NotAnObject,
    #[error("acm json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One project entry of `share.projects`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectShare {
    pub project: String,
    pub display: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Acm(Map<String, Value>);

impl TryFrom<Value> for Acm {
    type Error = AcmError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(AcmError::NotAnObject),
        }
    }
}

impl From<Acm> for Value {
    fn from(acm: Acm) -> Self {
        Value::Object(acm.0)
    }
}

impl std::str::FromStr for Acm {
    type Err = AcmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)?;
        value.try_into()
    }
}

impl Acm {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn classification(&self) -> Option<&str> {
        self.str_field("classif")
    }

    pub fn banner(&self) -> Option<&str> {
        self.str_field("banner")
    }

    pub fn portion(&self) -> Option<&str> {
        self.str_field("portion")
    }

    pub fn dissem_countries(&self) -> Vec<String> {
        string_list(self.0.get("dissem_countries"))
    }

    pub fn set_field(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn share_users(&self) -> Vec<String> {
        let share = self.0.get("share");
        string_list(share.and_then(|s| s.get("users")))
    }

    pub fn share_projects(&self) -> Vec<ProjectShare> {
        let Some(projects) = self
            .0
            .get("share")
            .and_then(|s| s.get("projects"))
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };
        projects
            .iter()
            .map(|(project, entry)| ProjectShare {
                project: project.clone(),
                display: entry
                    .get("disp_nm")
                    .and_then(Value::as_str)
                    .unwrap_or(project)
                    .to_string(),
                groups: string_list(entry.get("groups")),
            })
            .collect()
    }

    /// Every principal named in the `share` block.
    pub fn share_resources(&self) -> Vec<ResourceString> {
        let mut resources: Vec<ResourceString> = self
            .share_users()
            .into_iter()
            .map(ResourceString::user)
            .collect();
        for project in self.share_projects() {
            for group in &project.groups {
                resources.push(ResourceString::group(
                    project.project.clone(),
                    project.display.clone(),
                    group.clone(),
                ));
            }
        }
        resources
    }

    /// Flattened grantees of the `share` block. Empty means the object is
    /// not restricted by share.
    pub fn share_grantees(&self) -> BTreeSet<String> {
        self.share_resources().iter().map(|r| r.grantee()).collect()
    }

    /// Replace the `share` block with the given principals. `Everyone` entries
    /// are ignored; an empty list removes the block entirely.
    pub fn set_share<'a>(&mut self, resources: impl IntoIterator<Item = &'a ResourceString>) {
        let mut users: Vec<Value> = Vec::new();
        let mut projects = Map::new();
        for resource in resources {
            match resource {
                ResourceString::User { dn } => {
                    if !users.iter().any(|u| u.as_str() == Some(dn)) {
                        users.push(Value::String(dn.clone()));
                    }
                }
                ResourceString::Group {
                    project,
                    display,
                    group,
                } => {
                    let entry = projects.entry(project.clone()).or_insert_with(|| {
                        serde_json::json!({ "disp_nm": display, "groups": [] })
                    });
                    if let Some(groups) = entry.get_mut("groups").and_then(Value::as_array_mut) {
                        if !groups.iter().any(|g| g.as_str() == Some(group)) {
                            groups.push(Value::String(group.clone()));
                        }
                    }
                }
                ResourceString::Everyone => {}
            }
        }

        if users.is_empty() && projects.is_empty() {
            self.0.remove("share");
            return;
        }
        let mut share = Map::new();
        if !users.is_empty() {
            share.insert("users".into(), Value::Array(users));
        }
        if !projects.is_empty() {
            share.insert("projects".into(), Value::Object(projects));
        }
        self.0.insert("share".into(), Value::Object(share));
    }

    pub fn f_share(&self) -> Vec<String> {
        string_list(self.0.get("f_share"))
    }

    pub fn set_f_share(&mut self, values: &BTreeSet<String>) {
        let list = values.iter().cloned().map(Value::String).collect();
        self.0.insert("f_share".into(), Value::Array(list));
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn restricted() -> Acm {
        json!({
            "classif": "U",
            "banner": "UNCLASSIFIED",
            "portion": "U",
            "dissem_countries": ["USA"],
            "share": {
                "users": ["CN=alice,O=Org"],
                "projects": { "DCTC": { "disp_nm": "DCTC", "groups": ["ODrive_G2"] } }
            }
        })
        .try_into()
        .unwrap()
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            Acm::try_from(json!(["x"])),
            Err(AcmError::NotAnObject)
        ));
        assert!("\"U\"".parse::<Acm>().is_err());
    }

    #[test]
    fn test_reads_fields() {
        let acm = restricted();
        assert_eq!(acm.classification(), Some("U"));
        assert_eq!(acm.banner(), Some("UNCLASSIFIED"));
        assert_eq!(acm.dissem_countries(), vec!["USA"]);
        let grantees: Vec<String> = acm.share_grantees().into_iter().collect();
        assert_eq!(grantees, vec!["cnaliceoorg", "dctc_odriveg2"]);
    }

    #[test]
    fn test_set_share_round_trips() {
        let mut acm = restricted();
        let resources = acm.share_resources();
        acm.set_share(&resources);
        assert_eq!(acm, restricted());

        acm.set_share(&[ResourceString::Everyone]);
        assert!(acm.share_grantees().is_empty());
        assert!(acm.as_map().get("share").is_none());
    }

    #[test]
    fn test_set_share_deduplicates() {
        let mut acm = Acm::default();
        let alice = ResourceString::user("CN=alice");
        let group = ResourceString::group("P", "P", "g");
        acm.set_share([&alice, &alice, &group, &group]);
        assert_eq!(acm.share_users(), vec!["CN=alice"]);
        assert_eq!(acm.share_projects()[0].groups, vec!["g"]);
    }
}
