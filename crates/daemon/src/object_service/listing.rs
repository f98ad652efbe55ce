use uuid::Uuid;

use common::prelude::{Caller, Capabilities, Object, ResourceString};

use super::types::{GroupSpace, ObjectSummary, Page, Paging};
use super::{ObjectError, ObjectService};
use crate::database::{DatabaseConnection, ListKind, ObjectQueries, PermissionQueries};

/// Upper bound on rows pulled before permission filtering.
const CANDIDATE_LIMIT: u32 = 10_000;

impl ObjectService {
    /// Keep the candidates the caller can read, with their capabilities.
    async fn readable(
        &self,
        conn: &mut DatabaseConnection,
        caller: &Caller,
        candidates: Vec<Object>,
    ) -> Result<Vec<ObjectSummary>, ObjectError> {
        let mut visible = Vec::new();
        for object in candidates {
            let rows = PermissionQueries::for_object(conn, object.id).await?;
            let caps = caller.capabilities(self.master(), &rows);
            if !caps.contains(Capabilities::READ) {
                continue;
            }
            if !self.labels().check_access(&caller.dn, &object.acm).await? {
                continue;
            }
            visible.push(ObjectSummary {
                object,
                caller_permission: caps,
            });
        }
        Ok(visible)
    }

    /// Live children of `parent_id`, or root objects when `None`.
    pub async fn list_children(
        &self,
        caller: &Caller,
        parent_id: Option<Uuid>,
        paging: Paging,
    ) -> Result<Page<ObjectSummary>, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        if let Some(id) = parent_id {
            let (parent, rows) = self.load(&mut conn, id).await?;
            self.authorize(caller, &parent, &rows, Capabilities::READ)
                .await?;
        }
        let candidates = ObjectQueries::children(&mut conn, parent_id, CANDIDATE_LIMIT, 0).await?;
        let visible = self.readable(&mut conn, caller, candidates).await?;
        Ok(paging.page(visible))
    }

    /// Objects other owners have shared with the caller.
    pub async fn list_shared(
        &self,
        caller: &Caller,
        paging: Paging,
    ) -> Result<Page<ObjectSummary>, ObjectError> {
        let grantees: Vec<String> = caller.grantees.iter().cloned().collect();
        self.list_by_grantees(caller, ListKind::SharedWithCaller, &grantees, paging)
            .await
    }

    /// Objects the caller owns and has shared with someone.
    pub async fn list_shares(
        &self,
        caller: &Caller,
        paging: Paging,
    ) -> Result<Page<ObjectSummary>, ObjectError> {
        self.list_by_grantees(caller, ListKind::SharedByCaller, &[], paging)
            .await
    }

    /// Objects readable by everyone.
    pub async fn list_shared_public(
        &self,
        caller: &Caller,
        paging: Paging,
    ) -> Result<Page<ObjectSummary>, ObjectError> {
        self.list_by_grantees(caller, ListKind::Public, &[], paging)
            .await
    }

    async fn list_by_grantees(
        &self,
        caller: &Caller,
        kind: ListKind,
        grantees: &[String],
        paging: Paging,
    ) -> Result<Page<ObjectSummary>, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        let candidates = ObjectQueries::by_grantees(
            &mut conn,
            kind,
            &caller.resource(),
            grantees,
            CANDIDATE_LIMIT,
            0,
        )
        .await?;
        let visible = self.readable(&mut conn, caller, candidates).await?;
        Ok(paging.page(visible))
    }

    pub async fn list_trashed(
        &self,
        caller: &Caller,
        paging: Paging,
    ) -> Result<Page<ObjectSummary>, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        let candidates =
            ObjectQueries::trashed(&mut conn, &caller.resource(), CANDIDATE_LIMIT, 0).await?;
        let visible = self.readable(&mut conn, caller, candidates).await?;
        Ok(paging.page(visible))
    }

    /// Name or description substring search over readable, live objects.
    pub async fn search(
        &self,
        caller: &Caller,
        query: &str,
        paging: Paging,
    ) -> Result<Page<ObjectSummary>, ObjectError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ObjectError::BadRequest("search term is required".to_string()));
        }
        let mut conn = self.inner.db.acquire().await?;
        let candidates = ObjectQueries::search(&mut conn, query, CANDIDATE_LIMIT, 0).await?;
        let visible = self.readable(&mut conn, caller, candidates).await?;
        Ok(paging.page(visible))
    }

    /// The caller's groups and how many objects each owns.
    pub async fn list_groups(&self, caller: &Caller) -> Result<Vec<GroupSpace>, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        let mut groups = Vec::with_capacity(caller.groups.len());
        for group in &caller.groups {
            let display_name = match group {
                ResourceString::Group { display, .. } => display.clone(),
                other => other.to_string(),
            };
            let quantity = ObjectQueries::count_owned_by(&mut conn, group).await?;
            groups.push(GroupSpace {
                grantee: group.grantee(),
                resource_string: group.clone(),
                display_name,
                quantity,
            });
        }
        Ok(groups)
    }
}
