use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use common::prelude::{Capabilities, KeyEnvelope, Permission, PermissionPlan, ResourceString};

use super::{decode, DatabaseConnection};

pub struct PermissionQueries;

fn permission_from_row(row: &SqliteRow) -> Result<Permission, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let object_id: String = row.try_get("object_id")?;
    let resource: String = row.try_get("resource")?;
    let capabilities: i64 = row.try_get("capabilities")?;
    let iv: Vec<u8> = row.try_get("permission_iv")?;
    let wrapped: Vec<u8> = row.try_get("encrypt_key")?;
    let mac: Vec<u8> = row.try_get("permission_mac")?;

    Ok(Permission {
        id: decode("id", Uuid::parse_str(&id))?,
        object_id: decode("object_id", Uuid::parse_str(&object_id))?,
        grantee: row.try_get("grantee")?,
        resource: decode("resource", resource.parse::<ResourceString>())?,
        capabilities: Capabilities::from_bits(capabilities as u8),
        acm_share: row.try_get("acm_share")?,
        explicit: row.try_get("explicit")?,
        envelope: decode("envelope", KeyEnvelope::from_parts(&iv, &wrapped, &mac))?,
        created_by: row.try_get("created_by")?,
        created_date: row.try_get("created_date")?,
    })
}

impl PermissionQueries {
    pub async fn insert(
        conn: &mut DatabaseConnection,
        permission: &Permission,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO object_permissions (
                id, object_id, grantee, resource, capabilities, acm_share, explicit,
                permission_iv, encrypt_key, permission_mac, created_by, created_date
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(permission.id.to_string())
        .bind(permission.object_id.to_string())
        .bind(&permission.grantee)
        .bind(permission.resource.to_string())
        .bind(permission.capabilities.bits() as i64)
        .bind(&permission.acm_share)
        .bind(permission.explicit)
        .bind(permission.envelope.iv.to_vec())
        .bind(permission.envelope.wrapped_key.to_vec())
        .bind(permission.envelope.mac.to_vec())
        .bind(&permission.created_by)
        .bind(permission.created_date)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Live rows for `object_id`, MAC-valid or not.
    pub async fn for_object(
        conn: &mut DatabaseConnection,
        object_id: Uuid,
    ) -> Result<Vec<Permission>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, object_id, grantee, resource, capabilities, acm_share, explicit,
                   permission_iv, encrypt_key, permission_mac, created_by, created_date
            FROM object_permissions
            WHERE object_id = ? AND is_deleted = 0
            ORDER BY created_date, id
            "#,
        )
        .bind(object_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }

    pub async fn mark_deleted(conn: &mut DatabaseConnection, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE object_permissions SET is_deleted = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Retire `plan.removed` and store `plan.added`.
    pub async fn apply(
        conn: &mut DatabaseConnection,
        plan: &PermissionPlan,
    ) -> Result<(), sqlx::Error> {
        for row in &plan.removed {
            Self::mark_deleted(conn, row.id).await?;
        }
        for row in &plan.added {
            Self::insert(conn, row).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;

    use common::prelude::{Acm, ChangeToken, FileKey, MasterKey, Object, ObjectFlags};

    use super::*;
    use crate::database::{Database, ObjectQueries};

    #[tokio::test]
    async fn test_rows_round_trip_and_verify() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();
        let acm: Acm = json!({"classif": "U"}).try_into().unwrap();
        let obj = Object {
            id: Uuid::new_v4(),
            type_name: "File".into(),
            name: "f".into(),
            description: String::new(),
            parent_id: None,
            owned_by: ResourceString::user("CN=alice"),
            acm,
            content_connector: None,
            content_length: 0,
            content_type: None,
            content_hash: None,
            encrypt_iv: None,
            change_token: ChangeToken::generate(),
            change_count: 0,
            created_by: "CN=alice".into(),
            created_date: now,
            modified_by: "CN=alice".into(),
            modified_date: now,
            flags: ObjectFlags::default(),
            properties: BTreeMap::new(),
        };
        ObjectQueries::insert(&mut conn, &obj).await.unwrap();

        let master = MasterKey::derive(b"db test");
        let key = FileKey::generate();
        let row = Permission::grant(
            &master,
            obj.id,
            ResourceString::user("CN=alice"),
            Capabilities::FULL,
            &key,
            "CN=alice",
        );
        PermissionQueries::insert(&mut conn, &row).await.unwrap();

        let rows = PermissionQueries::for_object(&mut conn, obj.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_key(&master).unwrap(), key);
        assert_eq!(rows[0].capabilities, Capabilities::FULL);

        PermissionQueries::mark_deleted(&mut conn, row.id).await.unwrap();
        assert!(PermissionQueries::for_object(&mut conn, obj.id)
            .await
            .unwrap()
            .is_empty());
    }
}
