//! In-process label evaluator backed by a table of registered users.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{LabelAuthority, LabelError, ShareType, Snippet};
use crate::model::{flatten, Acm, ResourceString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "U")]
    Unclassified,
    #[serde(rename = "C")]
    Confidential,
    #[serde(rename = "S")]
    Secret,
    #[serde(rename = "TS")]
    TopSecret,
}

impl Classification {
    pub fn portion(&self) -> &'static str {
        match self {
            Classification::Unclassified => "U",
            Classification::Confidential => "C",
            Classification::Secret => "S",
            Classification::TopSecret => "TS",
        }
    }

    pub fn banner(&self) -> &'static str {
        match self {
            Classification::Unclassified => "UNCLASSIFIED",
            Classification::Confidential => "CONFIDENTIAL",
            Classification::Secret => "SECRET",
            Classification::TopSecret => "TOP SECRET",
        }
    }
}

impl FromStr for Classification {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "U" => Ok(Classification::Unclassified),
            "C" => Ok(Classification::Confidential),
            "S" => Ok(Classification::Secret),
            "TS" => Ok(Classification::TopSecret),
            other => Err(LabelError::Invalid(format!("unknown classification {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub dn: String,
    pub clearance: Classification,
    pub countries: Vec<String>,
    pub groups: Vec<ResourceString>,
}

impl UserProfile {
    pub fn new(dn: impl Into<String>, clearance: Classification) -> Self {
        Self {
            dn: dn.into(),
            clearance,
            countries: vec!["USA".to_string()],
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: ResourceString) -> Self {
        self.groups.push(group);
        self
    }

    fn f_share(&self) -> BTreeSet<String> {
        std::iter::once(flatten(&self.dn))
            .chain(self.groups.iter().map(ResourceString::grantee))
            .collect()
    }
}

/// Evaluates ACMs against registered [`UserProfile`]s.
///
/// - `validate` requires a known `classif`, fills `banner` and `portion`,
///   and recomputes `f_share` from the share block.
/// - `check_access` requires clearance at or above the classification, a
///   country overlap when `dissem_countries` is set, and a share overlap
///   when the share block is non-empty.
/// - Unknown users never have access.
#[derive(Debug, Default)]
pub struct MemoryLabelAuthority {
    users: RwLock<HashMap<String, UserProfile>>,
}

impl MemoryLabelAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, profile: UserProfile) {
        self.users.write().insert(flatten(&profile.dn), profile);
    }

    pub fn user(&self, dn: &str) -> Option<UserProfile> {
        self.users.read().get(&flatten(dn)).cloned()
    }

    fn classification(acm: &Acm) -> Result<Classification, LabelError> {
        acm.classification()
            .ok_or_else(|| LabelError::Invalid("acm is missing classif".to_string()))?
            .parse()
    }
}

#[async_trait::async_trait]
impl LabelAuthority for MemoryLabelAuthority {
    async fn validate(&self, _dn: &str, acm: &Acm) -> Result<Acm, LabelError> {
        let classif = Self::classification(acm)?;
        if let Some(countries) = acm.as_map().get("dissem_countries") {
            let ok = countries
                .as_array()
                .map(|list| list.iter().all(Value::is_string))
                .unwrap_or(false);
            if !ok {
                return Err(LabelError::Invalid(
                    "dissem_countries must be a list of strings".to_string(),
                ));
            }
        }

        let mut normalized = acm.clone();
        normalized.set_field("classif", Value::from(classif.portion()));
        if acm.banner().is_none() {
            normalized.set_field("banner", Value::from(classif.banner()));
        }
        if acm.portion().is_none() {
            normalized.set_field("portion", Value::from(classif.portion()));
        }
        normalized.set_f_share(&acm.share_grantees());
        Ok(normalized)
    }

    async fn rollup(
        &self,
        _dn: &str,
        acms: &[Acm],
        share_type: ShareType,
    ) -> Result<Acm, LabelError> {
        let mut highest = Classification::Unclassified;
        let mut countries: Option<BTreeSet<String>> = None;
        let mut shares: Vec<Vec<ResourceString>> = Vec::new();
        for acm in acms {
            highest = highest.max(Self::classification(acm)?);
            let dissem: BTreeSet<String> = acm.dissem_countries().into_iter().collect();
            if !dissem.is_empty() {
                countries = Some(match countries {
                    None => dissem,
                    Some(prev) => prev.intersection(&dissem).cloned().collect(),
                });
            }
            shares.push(acm.share_resources());
        }

        let combined: Vec<ResourceString> = match share_type {
            ShareType::Union => {
                if shares.iter().any(Vec::is_empty) {
                    Vec::new()
                } else {
                    let mut all: Vec<ResourceString> = shares.into_iter().flatten().collect();
                    all.sort();
                    all.dedup();
                    all
                }
            }
            ShareType::Intersection => {
                let mut restricted = shares.into_iter().filter(|s| !s.is_empty());
                match restricted.next() {
                    None => Vec::new(),
                    Some(first) => restricted.fold(first, |acc, next| {
                        acc.into_iter().filter(|r| next.contains(r)).collect()
                    }),
                }
            }
        };

        let mut rolled = Acm::default();
        rolled.set_field("classif", Value::from(highest.portion()));
        rolled.set_field("banner", Value::from(highest.banner()));
        rolled.set_field("portion", Value::from(highest.portion()));
        if let Some(countries) = countries {
            rolled.set_field(
                "dissem_countries",
                Value::Array(countries.into_iter().map(Value::String).collect()),
            );
        }
        rolled.set_share(&combined);
        let f_share = rolled.share_grantees();
        rolled.set_f_share(&f_share);
        Ok(rolled)
    }

    async fn check_access(&self, dn: &str, acm: &Acm) -> Result<bool, LabelError> {
        let Some(user) = self.user(dn) else {
            return Ok(false);
        };
        if user.clearance < Self::classification(acm)? {
            return Ok(false);
        }
        let dissem = acm.dissem_countries();
        if !dissem.is_empty() && !dissem.iter().any(|c| user.countries.contains(c)) {
            return Ok(false);
        }
        let share = acm.share_grantees();
        if !share.is_empty() && share.is_disjoint(&user.f_share()) {
            return Ok(false);
        }
        Ok(true)
    }

    async fn snippet(&self, dn: &str) -> Result<Snippet, LabelError> {
        let user = self
            .user(dn)
            .ok_or_else(|| LabelError::UnknownUser(dn.to_string()))?;
        Ok(Snippet {
            dn: user.dn.clone(),
            f_share: user.f_share(),
            groups: user.groups.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALICE: &str = "CN=alice,O=Org";
    const BOB: &str = "CN=bob,O=Org";

    fn authority() -> MemoryLabelAuthority {
        let labels = MemoryLabelAuthority::new();
        labels.register(
            UserProfile::new(ALICE, Classification::Secret)
                .with_group(ResourceString::group("DCTC", "DCTC", "ODrive_G1")),
        );
        labels.register(UserProfile::new(BOB, Classification::Unclassified));
        labels
    }

    fn acm(value: serde_json::Value) -> Acm {
        value.try_into().unwrap()
    }

    #[tokio::test]
    async fn test_validate_normalizes() {
        let labels = authority();
        let out = labels
            .validate(ALICE, &acm(json!({"classif": "u", "share": {"users": [BOB]}})))
            .await
            .unwrap();
        assert_eq!(out.classification(), Some("U"));
        assert_eq!(out.banner(), Some("UNCLASSIFIED"));
        assert_eq!(out.f_share(), vec!["cnboboorg"]);

        assert!(matches!(
            labels.validate(ALICE, &acm(json!({"classif": "Z"}))).await,
            Err(LabelError::Invalid(_))
        ));
        assert!(labels.validate(ALICE, &acm(json!({}))).await.is_err());
        assert!(labels
            .validate(ALICE, &acm(json!({"classif": "U", "dissem_countries": "USA"})))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_check_access() {
        let labels = authority();
        let secret = acm(json!({"classif": "S"}));
        assert!(labels.check_access(ALICE, &secret).await.unwrap());
        assert!(!labels.check_access(BOB, &secret).await.unwrap());
        assert!(!labels.check_access("CN=nobody", &secret).await.unwrap());

        let group_only = acm(json!({
            "classif": "U",
            "share": {"projects": {"DCTC": {"disp_nm": "DCTC", "groups": ["ODrive_G1"]}}}
        }));
        assert!(labels.check_access(ALICE, &group_only).await.unwrap());
        assert!(!labels.check_access(BOB, &group_only).await.unwrap());

        let foreign = acm(json!({"classif": "U", "dissem_countries": ["GBR"]}));
        assert!(!labels.check_access(BOB, &foreign).await.unwrap());
    }

    #[tokio::test]
    async fn test_rollup() {
        let labels = authority();
        let acms = vec![
            acm(json!({"classif": "U", "dissem_countries": ["USA", "GBR"]})),
            acm(json!({"classif": "S", "dissem_countries": ["USA"], "share": {"users": [ALICE]}})),
        ];
        let rolled = labels
            .rollup(ALICE, &acms, ShareType::Intersection)
            .await
            .unwrap();
        assert_eq!(rolled.banner(), Some("SECRET"));
        assert_eq!(rolled.dissem_countries(), vec!["USA"]);
        assert_eq!(rolled.share_users(), vec![ALICE]);

        let union = labels.rollup(ALICE, &acms, ShareType::Union).await.unwrap();
        assert!(union.share_grantees().is_empty());
    }

    #[tokio::test]
    async fn test_snippet() {
        let labels = authority();
        let snippet = labels.snippet(ALICE).await.unwrap();
        assert!(snippet.f_share.contains("cnaliceoorg"));
        assert!(snippet.f_share.contains("dctc_odriveg1"));
        assert!(matches!(
            labels.snippet("CN=ghost").await,
            Err(LabelError::UnknownUser(_))
        ));
    }
}
