use std::collections::BTreeSet;

use uuid::Uuid;

use common::prelude::{Caller, Capabilities, Mutation, ResourceString};

use super::types::ObjectResponse;
use super::{ObjectError, ObjectService};
use crate::database::{ObjectQueries, RevisionQueries};

impl ObjectService {
    /// Re-parent `id` under `new_parent`, or to the root when `None`.
    pub async fn move_object(
        &self,
        caller: &Caller,
        id: Uuid,
        new_parent: Option<Uuid>,
        change_token: Option<&str>,
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        Self::ensure_live(&object)?;
        if let Some(token) = change_token {
            Self::check_token(&object, token)?;
        }
        self.authorize(caller, &object, &rows, Capabilities::UPDATE)
            .await?;

        if let Some(parent_id) = new_parent {
            if parent_id == id {
                return Err(ObjectError::CycleDetected { id, parent_id });
            }
            let (parent, parent_rows) = self.load(&mut tx, parent_id).await?;
            Self::ensure_live(&parent)?;
            self.authorize(caller, &parent, &parent_rows, Capabilities::CREATE)
                .await?;
            let ancestors = ObjectQueries::ancestors(&mut tx, &parent).await?;
            if ancestors.iter().any(|a| a.id == id) {
                return Err(ObjectError::CycleDetected { id, parent_id });
            }
        }

        let previous = object.parent_id;
        object.parent_id = new_parent;
        object.touch(&caller.dn);
        self.save(&mut tx, &object, None).await?;
        tx.commit().await?;

        let fmt_parent = |p: Option<Uuid>| p.map(|p| p.to_string()).unwrap_or_default();
        self.emit(
            self.publish("move", caller, &object)
                .with_audit("previousParentId", fmt_parent(previous))
                .with_audit("parentId", fmt_parent(new_parent)),
        );
        Ok(self.response(caller, object, &rows))
    }

    /// Move to the trash. Descendants are flagged as ancestor-deleted.
    pub async fn delete_object(
        &self,
        caller: &Caller,
        id: Uuid,
        change_token: &str,
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        Self::ensure_live(&object)?;
        Self::check_token(&object, change_token)?;
        self.authorize(caller, &object, &rows, Capabilities::DELETE)
            .await?;

        object.flags.is_deleted = true;
        object.touch(&caller.dn);
        self.save(&mut tx, &object, None).await?;
        let flagged = ObjectQueries::mark_descendants(&mut tx, id, true).await?;
        tx.commit().await?;

        tracing::info!(object_id = %id, descendants = flagged, "object trashed");
        self.emit(
            self.publish("delete", caller, &object)
                .with_audit("descendants", flagged),
        );
        Ok(self.response(caller, object, &rows))
    }

    /// Restore `id` from the trash. Descendants stay flagged until they are
    /// restored themselves.
    pub async fn untrash_object(
        &self,
        caller: &Caller,
        id: Uuid,
        change_token: &str,
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        if !object.flags.in_trash() {
            return Err(ObjectError::BadRequest(format!("{id} is not in the trash")));
        }
        Self::check_token(&object, change_token)?;
        self.authorize(caller, &object, &rows, Capabilities::DELETE)
            .await?;

        let ancestors = ObjectQueries::ancestors(&mut tx, &object).await?;
        if ancestors.iter().any(|a| a.flags.is_deleted) {
            return Err(ObjectError::Deleted(id));
        }

        object.flags.is_deleted = false;
        object.flags.is_ancestor_deleted = false;
        object.touch(&caller.dn);
        self.save(&mut tx, &object, None).await?;
        tx.commit().await?;

        self.emit(self.publish("undelete", caller, &object));
        Ok(self.response(caller, object, &rows))
    }

    /// Permanently remove a trashed object and every ciphertext its
    /// revisions point at.
    pub async fn expunge_object(
        &self,
        caller: &Caller,
        id: Uuid,
        change_token: Option<&str>,
    ) -> Result<(), ObjectError> {
        self.guard_write()?;
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        if !object.flags.in_trash() {
            return Err(ObjectError::BadRequest(format!(
                "{id} must be trashed before it is expunged"
            )));
        }
        if let Some(token) = change_token {
            Self::check_token(&object, token)?;
        }
        self.authorize(caller, &object, &rows, Capabilities::DELETE)
            .await?;

        let connectors: BTreeSet<_> = RevisionQueries::list(&mut tx, id)
            .await?
            .iter()
            .filter_map(|rev| rev.content_connector)
            .chain(object.content_connector)
            .collect();

        object.flags.is_expunged = true;
        object.touch(&caller.dn);
        self.save(&mut tx, &object, None).await?;
        tx.commit().await?;

        for file_id in &connectors {
            if let Err(e) = self.inner.cache.expunge(*file_id).await {
                tracing::warn!(object_id = %id, file_id = %file_id, error = %e, "failed to remove expunged ciphertext");
            }
        }
        tracing::info!(object_id = %id, ciphertexts = connectors.len(), "object expunged");
        self.emit(self.publish("expunge", caller, &object));
        Ok(())
    }

    /// Hand the object to `new_owner`. It moves to the new owner's root and
    /// its rows are rebuilt around them.
    pub async fn change_owner(
        &self,
        caller: &Caller,
        id: Uuid,
        new_owner: ResourceString,
        change_token: Option<&str>,
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        Self::ensure_live(&object)?;
        if let Some(token) = change_token {
            Self::check_token(&object, token)?;
        }
        let key = self.file_key(caller, &rows)?;

        let previous_owner = std::mem::replace(&mut object.owned_by, new_owner);
        object.parent_id = None;
        let plan = self
            .inner
            .resolver
            .resolve(
                caller,
                &object,
                &rows,
                &Mutation::ChangeOwner {
                    previous_owner: previous_owner.clone(),
                },
                &key,
            )
            .await?;
        object.acm = plan.acm.clone();
        object.touch(&caller.dn);
        self.save(&mut tx, &object, Some(&plan)).await?;
        tx.commit().await?;

        self.emit(
            self.publish("change_owner", caller, &object)
                .with_audit("previousOwner", &previous_owner)
                .with_audit("ownedBy", &object.owned_by),
        );
        Ok(self.response(caller, object, &plan.rows()))
    }
}
