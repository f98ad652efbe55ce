use tokio::io::AsyncRead;
use uuid::Uuid;

use common::prelude::{Caller, Capabilities, Mutation};

use super::types::{ObjectResponse, UpdateProperties};
use super::{ObjectError, ObjectService, StoredContent};

impl ObjectService {
    pub async fn update_properties(
        &self,
        caller: &Caller,
        id: Uuid,
        update: UpdateProperties,
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        Self::ensure_live(&object)?;
        Self::check_token(&object, &update.change_token)?;
        self.authorize(caller, &object, &rows, Capabilities::UPDATE)
            .await?;

        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ObjectError::BadRequest("object name is required".to_string()));
            }
            object.name = name.to_string();
        }
        if let Some(description) = update.description {
            object.description = description;
        }
        if let Some(content_type) = update.content_type {
            object.content_type = Some(content_type);
        }
        if let Some(flag) = update.contains_us_persons_data {
            object.flags.contains_us_persons_data = flag;
        }
        if let Some(flag) = update.exempt_from_foia {
            object.flags.exempt_from_foia = flag;
        }
        if let Some(properties) = update.properties {
            object.properties = properties;
        }

        let mut plan = None;
        if let Some(acm) = update.acm {
            let previous = std::mem::replace(&mut object.acm, acm);
            let key = self.file_key(caller, &rows)?;
            let resolved = self
                .inner
                .resolver
                .resolve(caller, &object, &rows, &Mutation::UpdateAcm { previous }, &key)
                .await?;
            object.acm = resolved.acm.clone();
            plan = Some(resolved);
        }

        object.touch(&caller.dn);
        self.save(&mut tx, &object, plan.as_ref()).await?;
        tx.commit().await?;

        let rows = plan.map(|p| p.rows()).unwrap_or(rows);
        self.emit(self.publish("update", caller, &object));
        Ok(self.response(caller, object, &rows))
    }

    /// Replace the content. The previous revision keeps its own ciphertext.
    pub async fn update_stream(
        &self,
        caller: &Caller,
        id: Uuid,
        change_token: &str,
        content: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<ObjectResponse, ObjectError> {
        self.guard_write()?;
        let key = {
            let mut conn = self.inner.db.acquire().await?;
            let (object, rows) = self.load(&mut conn, id).await?;
            Self::ensure_live(&object)?;
            Self::check_token(&object, change_token)?;
            self.authorize(caller, &object, &rows, Capabilities::UPDATE)
                .await?;
            self.file_key(caller, &rows)?
        };

        let stored = self.store_content(content, &key).await?;
        match self.record_stream(caller, id, change_token, &stored).await {
            Ok(response) => {
                self.schedule_writeback(&stored);
                Ok(response)
            }
            Err(e) => {
                self.discard(&stored).await;
                Err(e)
            }
        }
    }

    async fn record_stream(
        &self,
        caller: &Caller,
        id: Uuid,
        change_token: &str,
        stored: &StoredContent,
    ) -> Result<ObjectResponse, ObjectError> {
        let mut tx = self.inner.db.begin().await?;
        let (mut object, rows) = self.load(&mut tx, id).await?;
        Self::ensure_live(&object)?;
        // another writer may have committed while the stream was uploading
        Self::check_token(&object, change_token)?;

        object.content_connector = Some(stored.file_id);
        object.content_length = stored.length;
        object.content_hash = Some(stored.sha256.clone());
        object.encrypt_iv = Some(stored.iv);
        object.touch(&caller.dn);
        self.save(&mut tx, &object, None).await?;
        tx.commit().await?;

        tracing::info!(object_id = %id, file_id = %stored.file_id, length = stored.length, "content replaced");
        self.emit(
            self.publish("update_stream", caller, &object)
                .with_audit("contentLength", stored.length),
        );
        Ok(self.response(caller, object, &rows))
    }
}
