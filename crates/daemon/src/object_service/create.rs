use chrono::Utc;
use tokio::io::AsyncRead;
use uuid::Uuid;

use common::prelude::{
    Caller, Capabilities, ChangeToken, Event, FileKey, Mutation, Object, ObjectFlags, Permission,
};

use super::types::{ObjectMetadata, ObjectResponse, FILE_TYPE, FOLDER_TYPE};
use super::{ObjectError, ObjectService, StoredContent};
use crate::database::{DatabaseConnection, ObjectQueries, PermissionQueries, RevisionQueries};

impl ObjectService {
    /// Create a file (when `content` is given) or a folder.
    ///
    /// With a name path delimiter configured, `a␞b␞c` creates or reuses
    /// folders `a` and `a/b` under the requested parent and puts `c` in the
    /// innermost one. Intermediate folders inherit the ACM and owner.
    pub async fn create_object(
        &self,
        caller: &Caller,
        metadata: ObjectMetadata,
        content: Option<&mut (dyn AsyncRead + Unpin + Send)>,
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let (folders, leaf) = self.split_name_path(&metadata.name)?;

        let file_key = FileKey::generate();
        let stored = match content {
            Some(reader) => Some(self.store_content(reader, &file_key).await?),
            None => None,
        };

        let result = self
            .record_created(caller, metadata, folders, leaf, file_key, stored.as_ref())
            .await;
        match result {
            Ok((response, events)) => {
                if let Some(stored) = &stored {
                    self.schedule_writeback(stored);
                }
                for event in events {
                    self.emit(event);
                }
                tracing::info!(
                    object_id = %response.object.id,
                    name = %response.object.name,
                    actor = %caller.dn,
                    "object created"
                );
                Ok(response)
            }
            Err(e) => {
                if let Some(stored) = &stored {
                    self.discard(stored).await;
                }
                Err(e)
            }
        }
    }

    fn split_name_path(&self, name: &str) -> Result<(Vec<String>, String), ObjectError> {
        let missing = || ObjectError::BadRequest("object name is required".to_string());
        let Some(delimiter) = self.inner.options.name_path_delimiter else {
            let name = name.trim();
            if name.is_empty() {
                return Err(missing());
            }
            return Ok((Vec::new(), name.to_string()));
        };
        let mut parts: Vec<String> = name
            .split(delimiter)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect();
        let leaf = parts.pop().ok_or_else(missing)?;
        Ok((parts, leaf))
    }

    async fn record_created(
        &self,
        caller: &Caller,
        metadata: ObjectMetadata,
        folders: Vec<String>,
        leaf: String,
        file_key: FileKey,
        content: Option<&StoredContent>,
    ) -> Result<(ObjectResponse, Vec<Event>), ObjectError> {
        let mut tx = self.inner.db.begin().await?;
        let mut events = Vec::new();

        let mut parent_id = metadata.parent_id;
        if let Some(id) = parent_id {
            let (parent, rows) = self.load(&mut tx, id).await?;
            Self::ensure_live(&parent)?;
            self.authorize(caller, &parent, &rows, Capabilities::CREATE)
                .await?;
        }

        for folder in folders {
            let existing = ObjectQueries::find_child(&mut tx, parent_id, &folder).await?;
            let id = match existing {
                Some(found) if found.type_name == FOLDER_TYPE => {
                    let rows = PermissionQueries::for_object(&mut tx, found.id).await?;
                    self.authorize(caller, &found, &rows, Capabilities::CREATE)
                        .await?;
                    found.id
                }
                _ => {
                    let spec = ObjectMetadata {
                        type_name: Some(FOLDER_TYPE.to_string()),
                        name: folder.clone(),
                        description: String::new(),
                        parent_id,
                        owned_by: metadata.owned_by.clone(),
                        acm: metadata.acm.clone(),
                        content_type: None,
                        contains_us_persons_data: metadata.contains_us_persons_data,
                        exempt_from_foia: metadata.exempt_from_foia,
                        properties: Default::default(),
                    };
                    let (object, _) = self
                        .insert_object(&mut tx, caller, spec, folder, FileKey::generate(), None)
                        .await?;
                    tracing::debug!(object_id = %object.id, name = %object.name, "intermediate folder created");
                    events.push(self.publish("create", caller, &object));
                    object.id
                }
            };
            parent_id = Some(id);
        }

        let spec = ObjectMetadata {
            parent_id,
            ..metadata
        };
        let (object, rows) = self
            .insert_object(&mut tx, caller, spec, leaf, file_key, content)
            .await?;
        tx.commit().await?;

        events.push(self.publish("create", caller, &object));
        Ok((self.response(caller, object, &rows), events))
    }

    async fn insert_object(
        &self,
        conn: &mut DatabaseConnection,
        caller: &Caller,
        spec: ObjectMetadata,
        name: String,
        file_key: FileKey,
        content: Option<&StoredContent>,
    ) -> Result<(Object, Vec<Permission>), ObjectError> {
        let now = Utc::now();
        let default_type = if content.is_some() { FILE_TYPE } else { FOLDER_TYPE };
        let mut object = Object {
            id: Uuid::new_v4(),
            type_name: spec.type_name.unwrap_or_else(|| default_type.to_string()),
            name,
            description: spec.description,
            parent_id: spec.parent_id,
            owned_by: spec.owned_by.unwrap_or_else(|| caller.resource()),
            acm: spec.acm,
            content_connector: content.map(|c| c.file_id),
            content_length: content.map(|c| c.length).unwrap_or(0),
            content_type: spec.content_type,
            content_hash: content.map(|c| c.sha256.clone()),
            encrypt_iv: content.map(|c| c.iv),
            change_token: ChangeToken::generate(),
            change_count: 0,
            created_by: caller.dn.clone(),
            created_date: now,
            modified_by: caller.dn.clone(),
            modified_date: now,
            flags: ObjectFlags {
                contains_us_persons_data: spec.contains_us_persons_data,
                exempt_from_foia: spec.exempt_from_foia,
                ..ObjectFlags::default()
            },
            properties: spec.properties,
        };

        let plan = self
            .inner
            .resolver
            .resolve(caller, &object, &[], &Mutation::Create, &file_key)
            .await?;
        object.acm = plan.acm.clone();

        ObjectQueries::insert(conn, &object).await?;
        PermissionQueries::apply(conn, &plan).await?;
        RevisionQueries::insert(conn, &object.revision()).await?;
        Ok((object, plan.rows()))
    }
}
