//! Resource strings and the flattened grantee keys derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Grantee key of the reserved group that grants read to any authenticated caller.
pub const EVERYONE: &str = "-Everyone";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GranteeError {
    #[error("resource string is empty")]
    Empty,
    #[error("unrecognized resource string: {0}")]
    Unrecognized(String),
}

/// Lower-case a value and strip everything that is not an ASCII letter or digit.
pub fn flatten(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Canonical address of a principal.
///
/// - `user/<dn>`
/// - `group/<project>/<display>/<group>`
/// - `group/-Everyone`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceString {
    User {
        dn: String,
    },
    Group {
        project: String,
        display: String,
        group: String,
    },
    Everyone,
}

impl ResourceString {
    pub fn user(dn: impl Into<String>) -> Self {
        Self::User { dn: dn.into() }
    }

    pub fn group(
        project: impl Into<String>,
        display: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self::Group {
            project: project.into(),
            display: display.into(),
            group: group.into(),
        }
    }

    /// Flattened key used to match permission rows against a caller.
    pub fn grantee(&self) -> String {
        match self {
            Self::User { dn } => flatten(dn),
            Self::Group { project, group, .. } => {
                format!("{}_{}", flatten(project), flatten(group))
            }
            Self::Everyone => EVERYONE.to_string(),
        }
    }

    pub fn is_everyone(&self) -> bool {
        matches!(self, Self::Everyone)
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn dn(&self) -> Option<&str> {
        match self {
            Self::User { dn } => Some(dn),
            _ => None,
        }
    }
}

impl FromStr for ResourceString {
    type Err = GranteeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GranteeError::Empty);
        }
        if let Some(dn) = s.strip_prefix("user/") {
            if dn.is_empty() {
                return Err(GranteeError::Unrecognized(s.to_string()));
            }
            return Ok(Self::user(dn));
        }
        if let Some(rest) = s.strip_prefix("group/") {
            if rest == EVERYONE {
                return Ok(Self::Everyone);
            }
            let parts: Vec<&str> = rest.splitn(3, '/').collect();
            if let [project, display, group] = parts.as_slice() {
                if !project.is_empty() && !group.is_empty() {
                    return Ok(Self::group(*project, *display, *group));
                }
            }
        }
        Err(GranteeError::Unrecognized(s.to_string()))
    }
}

impl fmt::Display for ResourceString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { dn } => write!(f, "user/{dn}"),
            Self::Group {
                project,
                display,
                group,
            } => write!(f, "group/{project}/{display}/{group}"),
            Self::Everyone => write!(f, "group/{EVERYONE}"),
        }
    }
}

impl Serialize for ResourceString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
