use uuid::Uuid;

use common::prelude::{Caller, Mutation, ShareGrant};

use super::types::{ObjectResponse, ObjectShare};
use super::{ObjectError, ObjectService};

impl ObjectService {
    pub async fn add_share(
        &self,
        caller: &Caller,
        id: Uuid,
        share: ObjectShare,
    ) -> Result<ObjectResponse, ObjectError> {
        if share.capabilities.is_empty() {
            return Err(ObjectError::BadRequest(
                "a share must grant at least one capability".to_string(),
            ));
        }
        let grant = ShareGrant {
            resource: share.grantee,
            capabilities: share.capabilities,
        };
        self.apply_share(caller, id, Mutation::AddShare(grant)).await
    }

    /// Remove capabilities from a grantee. An empty capability set removes
    /// the grantee's rows entirely.
    pub async fn remove_share(
        &self,
        caller: &Caller,
        id: Uuid,
        share: ObjectShare,
    ) -> Result<ObjectResponse, ObjectError> {
        let grant = ShareGrant {
            resource: share.grantee,
            capabilities: share.capabilities,
        };
        self.apply_share(caller, id, Mutation::RemoveShare(grant)).await
    }

    async fn apply_share(
        &self,
        caller: &Caller,
        id: Uuid,
        mutation: Mutation,
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        Self::ensure_live(&object)?;
        let key = self.file_key(caller, &rows)?;

        let plan = self
            .inner
            .resolver
            .resolve(caller, &object, &rows, &mutation, &key)
            .await?;
        if plan.is_unchanged() && plan.acm == object.acm {
            tracing::debug!(object_id = %id, mutation = mutation.name(), "share already in place");
            return Ok(self.response(caller, object, &rows));
        }

        object.acm = plan.acm.clone();
        object.touch(&caller.dn);
        self.save(&mut tx, &object, Some(&plan)).await?;
        tx.commit().await?;

        let (grantee, capabilities) = match &mutation {
            Mutation::AddShare(grant) | Mutation::RemoveShare(grant) => {
                (grant.resource.to_string(), grant.capabilities.to_string())
            }
            _ => (String::new(), String::new()),
        };
        self.emit(
            self.publish(mutation.name(), caller, &object)
                .with_audit("grantee", grantee)
                .with_audit("capabilities", capabilities)
                .with_audit("rowsAdded", plan.added.len())
                .with_audit("rowsRemoved", plan.removed.len()),
        );
        Ok(self.response(caller, object, &plan.rows()))
    }
}

#[cfg(test)]
mod tests {
    use common::prelude::{Capabilities, ResourceString};

    use super::*;
    use crate::object_service::testkit::{harness, unclassified, ALICE, BOB, CAROL};
    use crate::object_service::ObjectMetadata;

    fn read(grantee: ResourceString) -> ObjectShare {
        ObjectShare {
            grantee,
            capabilities: Capabilities::READ,
        }
    }

    #[tokio::test]
    async fn test_add_share_replaces_everyone_and_is_idempotent() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let bob = h.caller(BOB).await;
        let carol = h.caller(CAROL).await;
        let created = h
            .service
            .create_object(&alice, ObjectMetadata::new("doc", unclassified()), None)
            .await
            .unwrap();
        let id = created.object.id;
        assert!(h.service.get_properties(&carol, id).await.is_ok());

        let first = h.service.add_share(&alice, id, read(bob.resource())).await.unwrap();
        assert!(first.permissions.iter().all(|p| p.grantee != "-Everyone"));
        assert!(h.service.get_properties(&bob, id).await.is_ok());
        assert!(matches!(
            h.service.get_properties(&carol, id).await,
            Err(ObjectError::PermissionDenied(_))
        ));

        let second = h.service.add_share(&alice, id, read(bob.resource())).await.unwrap();
        assert_eq!(second.object.change_token, first.object.change_token);
        assert_eq!(second.permissions, first.permissions);
        assert_eq!(h.events.actions(), vec!["create", "add_share"]);
    }

    #[tokio::test]
    async fn test_reader_cannot_share_but_can_leave() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let bob = h.caller(BOB).await;
        let carol = h.caller(CAROL).await;
        let created = h
            .service
            .create_object(&alice, ObjectMetadata::new("doc", unclassified()), None)
            .await
            .unwrap();
        let id = created.object.id;
        h.service.add_share(&alice, id, read(bob.resource())).await.unwrap();

        let err = h
            .service
            .add_share(&bob, id, read(carol.resource()))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::PermissionDenied(_)));

        let left = h
            .service
            .remove_share(
                &bob,
                id,
                ObjectShare {
                    grantee: bob.resource(),
                    capabilities: Capabilities::NONE,
                },
            )
            .await
            .unwrap();
        assert!(left.permissions.iter().all(|p| p.grantee != bob.grantee()));
        assert!(h.service.get_properties(&bob, id).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_grant_rejected() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let created = h
            .service
            .create_object(&alice, ObjectMetadata::new("doc", unclassified()), None)
            .await
            .unwrap();
        let err = h
            .service
            .add_share(
                &alice,
                created.object.id,
                ObjectShare {
                    grantee: ResourceString::user(BOB),
                    capabilities: Capabilities::NONE,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::BadRequest(_)));
    }
}
