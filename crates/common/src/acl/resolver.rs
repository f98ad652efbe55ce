//! Computes the permission rows an object should carry after a mutation.
//!
//! Rules, in order:
//!
//! 1. The requested ACM is validated by the label authority.
//! 2. The owner must be a known user or one of the caller's groups, never
//!    `-Everyone`.
//! 3. Share mutations, and ACM updates that change the share set, need the
//!    caller to hold `share`. Removing your own user row is always allowed.
//! 4. The ACM share set `G` is the ACM's `share` block plus every explicit
//!    grantee holding read. When `G` is non-empty the owner is added to it,
//!    and on create so is the caller. When `G` is empty the object is public
//!    and gets a `-Everyone` read row; otherwise it never does.
//! 5. Raising the classification drops explicit user rows whose user is no
//!    longer cleared for the new ACM.
//! 6. The ACM `share` block is rebuilt from `G` and re-validated so
//!    `f_share` matches the read grantees.
//! 7. Rows whose grantee, capabilities and origin are unchanged are kept
//!    as-is. Everything else is re-wrapped under a fresh IV. Rows whose MAC
//!    fails are dropped and rebuilt.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crypto::{FileKey, MasterKey};
use crate::label::{LabelAuthority, LabelError};
use crate::model::{Acm, Capabilities, Object, Permission, ResourceString, EVERYONE};

use super::{Caller, PermissionError};

/// A grant named in an add/remove share request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareGrant {
    pub resource: ResourceString,
    /// For removal, an empty set means every capability.
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create,
    /// The object carries the requested ACM; `previous` is the stored one.
    UpdateAcm { previous: Acm },
    AddShare(ShareGrant),
    RemoveShare(ShareGrant),
    /// The object carries the new owner.
    ChangeOwner { previous_owner: ResourceString },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Create => "create",
            Mutation::UpdateAcm { .. } => "update_acm",
            Mutation::AddShare(_) => "add_share",
            Mutation::RemoveShare(_) => "remove_share",
            Mutation::ChangeOwner { .. } => "change_owner",
        }
    }
}

/// Row changes to apply, plus the ACM to store alongside them.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionPlan {
    pub acm: Acm,
    pub keep: Vec<Permission>,
    pub added: Vec<Permission>,
    pub removed: Vec<Permission>,
}

impl PermissionPlan {
    /// Rows the object carries once the plan is applied.
    pub fn rows(&self) -> Vec<Permission> {
        self.keep.iter().chain(self.added.iter()).cloned().collect()
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Target {
    resource: ResourceString,
    capabilities: Capabilities,
    explicit: bool,
    acm_share: Option<String>,
}

impl Target {
    fn new(resource: ResourceString) -> Self {
        Self {
            resource,
            capabilities: Capabilities::NONE,
            explicit: false,
            acm_share: None,
        }
    }

    fn matches(&self, row: &Permission) -> bool {
        row.capabilities == self.capabilities
            && row.explicit == self.explicit
            && row.acm_share == self.acm_share
    }
}

#[derive(Clone)]
pub struct PermissionResolver {
    master: Arc<MasterKey>,
    labels: Arc<dyn LabelAuthority>,
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

impl PermissionResolver {
    pub fn new(master: Arc<MasterKey>, labels: Arc<dyn LabelAuthority>) -> Self {
        Self { master, labels }
    }

    pub fn master(&self) -> &MasterKey {
        &self.master
    }

    pub fn labels(&self) -> &Arc<dyn LabelAuthority> {
        &self.labels
    }

    /// Users must be known to the label authority. Groups must be one the
    /// caller belongs to, since the authority cannot enumerate groups.
    async fn check_owner(
        &self,
        caller: &Caller,
        owner: &ResourceString,
    ) -> Result<(), PermissionError> {
        match owner {
            ResourceString::Everyone => Err(PermissionError::InvalidOwner(format!(
                "{owner} cannot own objects"
            ))),
            ResourceString::User { dn } => match self.labels.snippet(dn).await {
                Ok(_) => Ok(()),
                Err(LabelError::UnknownUser(_)) => Err(PermissionError::InvalidOwner(format!(
                    "{owner} is not a known user"
                ))),
                Err(e) => Err(e.into()),
            },
            ResourceString::Group { .. } if caller.grantees.contains(&owner.grantee()) => Ok(()),
            ResourceString::Group { .. } => Err(PermissionError::InvalidOwner(format!(
                "{owner} is not a group of {}",
                caller.dn
            ))),
        }
    }

    fn require_share(
        caller: &Caller,
        caps: Capabilities,
        what: &str,
    ) -> Result<(), PermissionError> {
        if caps.contains(Capabilities::SHARE) {
            Ok(())
        } else {
            Err(PermissionError::Denied(format!(
                "{} needs share permission to {what}",
                caller.dn
            )))
        }
    }

    /// Compute the rows `object` should carry after `mutation`.
    ///
    /// `object` is the post-image (requested ACM, current owner); `current`
    /// are the rows stored now. `file_key` is wrapped into every new row.
    pub async fn resolve(
        &self,
        caller: &Caller,
        object: &Object,
        current: &[Permission],
        mutation: &Mutation,
        file_key: &FileKey,
    ) -> Result<PermissionPlan, PermissionError> {
        let acm = self.labels.validate(&caller.dn, &object.acm).await?;

        let owner = object.owned_by.clone();
        match mutation {
            Mutation::Create | Mutation::ChangeOwner { .. } => {
                self.check_owner(caller, &owner).await?
            }
            _ if owner.is_everyone() => self.check_owner(caller, &owner).await?,
            _ => {}
        }

        let (valid, invalid): (Vec<&Permission>, Vec<&Permission>) =
            current.iter().partition(|row| row.is_valid(&self.master));
        for row in &invalid {
            tracing::warn!(object_id = %object.id, permission_id = %row.id, grantee = %row.grantee, "permission mac mismatch, treating row as absent");
        }

        let caller_caps = caller.capabilities(&self.master, current);
        match mutation {
            Mutation::Create => {}
            Mutation::AddShare(_) => Self::require_share(caller, caller_caps, "add a share")?,
            Mutation::RemoveShare(grant) => {
                let own_row = grant.resource.is_user() && caller.is(&grant.resource);
                if !own_row {
                    Self::require_share(caller, caller_caps, "remove a share")?;
                }
            }
            Mutation::UpdateAcm { previous } => {
                if previous.share_grantees() != object.acm.share_grantees() {
                    Self::require_share(caller, caller_caps, "change the acm share")?;
                }
            }
            Mutation::ChangeOwner { previous_owner } => {
                if !caller.is(previous_owner) {
                    return Err(PermissionError::Denied(format!(
                        "{} does not own the object",
                        caller.dn
                    )));
                }
            }
        }

        let going_public = match mutation {
            Mutation::AddShare(grant) => grant.resource.is_everyone(),
            Mutation::UpdateAcm { .. } => acm.share_grantees().is_empty(),
            _ => false,
        };

        // explicit grants survive every mutation unless removed below
        let mut explicit: BTreeMap<String, Target> = BTreeMap::new();
        for row in valid.iter().filter(|row| row.explicit) {
            let target = explicit
                .entry(row.grantee.clone())
                .or_insert_with(|| Target::new(row.resource.clone()));
            target.explicit = true;
            target.capabilities |= row.capabilities;
        }

        let mut revoked = Vec::new();
        if let Mutation::UpdateAcm { previous } = mutation {
            if previous.classification() != acm.classification() {
                let mut dropped = Vec::new();
                for (grantee, target) in &explicit {
                    if let ResourceString::User { dn } = &target.resource {
                        if !self.labels.check_access(dn, &acm).await? {
                            dropped.push(grantee.clone());
                        }
                    }
                }
                for grantee in dropped {
                    tracing::info!(object_id = %object.id, grantee = %grantee, "classification change revoked explicit grant");
                    explicit.remove(&grantee);
                    revoked.push(grantee);
                }
            }
        }

        if going_public {
            for target in explicit.values_mut() {
                target.capabilities = target.capabilities.without(Capabilities::READ);
            }
        }

        let mut share: BTreeMap<String, ResourceString> = if going_public {
            BTreeMap::new()
        } else {
            acm.share_resources()
                .into_iter()
                .map(|r| (r.grantee(), r))
                .collect()
        };
        for grantee in &revoked {
            share.remove(grantee);
        }

        match mutation {
            Mutation::AddShare(grant) if !grant.resource.is_everyone() => {
                let grantee = grant.resource.grantee();
                let target = explicit
                    .entry(grantee.clone())
                    .or_insert_with(|| Target::new(grant.resource.clone()));
                target.explicit = true;
                target.capabilities |= grant.capabilities;
            }
            Mutation::RemoveShare(grant) if grant.resource.is_everyone() => {
                if share.is_empty() {
                    share.insert(owner.grantee(), owner.clone());
                }
            }
            Mutation::RemoveShare(grant) => {
                let revoke = if grant.capabilities.is_empty() {
                    Capabilities::FULL
                } else {
                    grant.capabilities
                };
                let grantee = grant.resource.grantee();
                if let Some(target) = explicit.get_mut(&grantee) {
                    target.capabilities = target.capabilities.without(revoke);
                }
                if revoke.contains(Capabilities::READ) {
                    share.remove(&grantee);
                }
            }
            _ => {}
        }

        for (grantee, target) in &explicit {
            if target.capabilities.contains(Capabilities::READ) {
                share.insert(grantee.clone(), target.resource.clone());
            }
        }
        if !share.is_empty() {
            if matches!(mutation, Mutation::Create) {
                share.insert(caller.grantee(), caller.resource());
            }
            share.insert(owner.grantee(), owner.clone());
        }

        let mut targets: BTreeMap<String, Target> = explicit
            .into_iter()
            .filter(|(_, t)| !t.capabilities.is_empty())
            .collect();
        for (grantee, resource) in &share {
            let target = targets
                .entry(grantee.clone())
                .or_insert_with(|| Target::new(resource.clone()));
            target.capabilities |= Capabilities::READ;
            target.acm_share = Some(resource.to_string());
        }
        if share.is_empty() {
            let target = targets
                .entry(EVERYONE.to_string())
                .or_insert_with(|| Target::new(ResourceString::Everyone));
            target.capabilities |= Capabilities::READ;
            target.acm_share = Some(ResourceString::Everyone.to_string());
        }
        targets
            .entry(owner.grantee())
            .or_insert_with(|| Target::new(owner.clone()))
            .capabilities = Capabilities::FULL;

        let mut synced = acm;
        synced.set_share(share.values());
        let acm = self.labels.validate(&caller.dn, &synced).await?;

        let mut keep = Vec::new();
        let mut removed: Vec<Permission> = invalid.into_iter().cloned().collect();
        for row in valid {
            match targets.get(&row.grantee) {
                Some(target) if target.matches(row) => {
                    targets.remove(&row.grantee);
                    keep.push(row.clone());
                }
                _ => removed.push(row.clone()),
            }
        }

        let added: Vec<Permission> = targets
            .into_values()
            .map(|target| {
                let mut row = Permission::grant(
                    &self.master,
                    object.id,
                    target.resource,
                    target.capabilities,
                    file_key,
                    &caller.dn,
                );
                row.explicit = target.explicit;
                row.acm_share = target.acm_share;
                row
            })
            .collect();

        tracing::debug!(
            object_id = %object.id,
            mutation = mutation.name(),
            kept = keep.len(),
            added = added.len(),
            removed = removed.len(),
            "permissions resolved"
        );
        Ok(PermissionPlan {
            acm,
            keep,
            added,
            removed,
        })
    }
}
