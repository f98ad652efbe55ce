use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use common::prelude::{Acm, ChangeToken, FileId, Object, ObjectFlags, ResourceString, StreamIv};

use super::{decode, DatabaseConnection};

const COLUMNS: &str = r#"
    o.id, o.type_name, o.name, o.description, o.parent_id, o.owned_by, o.acm,
    o.content_connector, o.content_length, o.content_type, o.content_hash, o.encrypt_iv,
    o.change_token, o.change_count, o.created_by, o.created_date, o.modified_by,
    o.modified_date, o.is_deleted, o.is_ancestor_deleted, o.is_expunged,
    o.contains_us_persons_data, o.exempt_from_foia, o.properties
"#;

/// Listing shapes that select candidates by permission grantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Readable through a row the caller holds, excluding ownership and `-Everyone`.
    SharedWithCaller,
    /// Owned by the caller and granted to someone else.
    SharedByCaller,
    /// Carrying a `-Everyone` row.
    Public,
}

pub struct ObjectQueries;

fn object_from_row(row: &SqliteRow) -> Result<Object, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let owned_by: String = row.try_get("owned_by")?;
    let acm: String = row.try_get("acm")?;
    let connector: Option<String> = row.try_get("content_connector")?;
    let iv: Option<String> = row.try_get("encrypt_iv")?;
    let properties: String = row.try_get("properties")?;
    let content_length: i64 = row.try_get("content_length")?;

    Ok(Object {
        id: decode("id", Uuid::parse_str(&id))?,
        type_name: row.try_get("type_name")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parent_id: parent_id
            .map(|p| decode("parent_id", Uuid::parse_str(&p)))
            .transpose()?,
        owned_by: decode("owned_by", owned_by.parse::<ResourceString>())?,
        acm: decode("acm", acm.parse::<Acm>())?,
        content_connector: connector
            .map(|c| decode("content_connector", c.parse::<FileId>()))
            .transpose()?,
        content_length: content_length.max(0) as u64,
        content_type: row.try_get("content_type")?,
        content_hash: row.try_get("content_hash")?,
        encrypt_iv: iv
            .map(|v| decode("encrypt_iv", v.parse::<StreamIv>()))
            .transpose()?,
        change_token: ChangeToken::from(row.try_get::<String, _>("change_token")?),
        change_count: row.try_get("change_count")?,
        created_by: row.try_get("created_by")?,
        created_date: row.try_get("created_date")?,
        modified_by: row.try_get("modified_by")?,
        modified_date: row.try_get("modified_date")?,
        flags: ObjectFlags {
            is_deleted: row.try_get("is_deleted")?,
            is_ancestor_deleted: row.try_get("is_ancestor_deleted")?,
            is_expunged: row.try_get("is_expunged")?,
            contains_us_persons_data: row.try_get("contains_us_persons_data")?,
            exempt_from_foia: row.try_get("exempt_from_foia")?,
        },
        properties: decode(
            "properties",
            serde_json::from_str::<BTreeMap<String, String>>(&properties),
        )?,
    })
}

fn properties_json(object: &Object) -> String {
    serde_json::to_string(&object.properties).unwrap_or_else(|_| "{}".to_string())
}

impl ObjectQueries {
    pub async fn insert(conn: &mut DatabaseConnection, object: &Object) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO objects (
                id, type_name, name, description, parent_id, owned_by, acm,
                content_connector, content_length, content_type, content_hash, encrypt_iv,
                change_token, change_count, created_by, created_date, modified_by,
                modified_date, is_deleted, is_ancestor_deleted, is_expunged,
                contains_us_persons_data, exempt_from_foia, properties
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(object.id.to_string())
        .bind(&object.type_name)
        .bind(&object.name)
        .bind(&object.description)
        .bind(object.parent_id.map(|p| p.to_string()))
        .bind(object.owned_by.to_string())
        .bind(object.acm.to_json())
        .bind(object.content_connector.map(|c| c.to_hex()))
        .bind(object.content_length as i64)
        .bind(&object.content_type)
        .bind(&object.content_hash)
        .bind(object.encrypt_iv.map(|iv| iv.to_hex()))
        .bind(object.change_token.as_str())
        .bind(object.change_count)
        .bind(&object.created_by)
        .bind(object.created_date)
        .bind(&object.modified_by)
        .bind(object.modified_date)
        .bind(object.flags.is_deleted)
        .bind(object.flags.is_ancestor_deleted)
        .bind(object.flags.is_expunged)
        .bind(object.flags.contains_us_persons_data)
        .bind(object.flags.exempt_from_foia)
        .bind(properties_json(object))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Overwrite every mutable column of `object`.
    pub async fn update(conn: &mut DatabaseConnection, object: &Object) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE objects SET
                type_name = ?, name = ?, description = ?, parent_id = ?, owned_by = ?, acm = ?,
                content_connector = ?, content_length = ?, content_type = ?, content_hash = ?,
                encrypt_iv = ?, change_token = ?, change_count = ?, modified_by = ?,
                modified_date = ?, is_deleted = ?, is_ancestor_deleted = ?, is_expunged = ?,
                contains_us_persons_data = ?, exempt_from_foia = ?, properties = ?
            WHERE id = ?
            "#,
        )
        .bind(&object.type_name)
        .bind(&object.name)
        .bind(&object.description)
        .bind(object.parent_id.map(|p| p.to_string()))
        .bind(object.owned_by.to_string())
        .bind(object.acm.to_json())
        .bind(object.content_connector.map(|c| c.to_hex()))
        .bind(object.content_length as i64)
        .bind(&object.content_type)
        .bind(&object.content_hash)
        .bind(object.encrypt_iv.map(|iv| iv.to_hex()))
        .bind(object.change_token.as_str())
        .bind(object.change_count)
        .bind(&object.modified_by)
        .bind(object.modified_date)
        .bind(object.flags.is_deleted)
        .bind(object.flags.is_ancestor_deleted)
        .bind(object.flags.is_expunged)
        .bind(object.flags.contains_us_persons_data)
        .bind(object.flags.exempt_from_foia)
        .bind(properties_json(object))
        .bind(object.id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    pub async fn get(
        conn: &mut DatabaseConnection,
        id: Uuid,
    ) -> Result<Option<Object>, sqlx::Error> {
        let sql = format!("SELECT {COLUMNS} FROM objects o WHERE o.id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(object_from_row).transpose()
    }

    /// Live child of `parent` (or of the root) called `name`.
    pub async fn find_child(
        conn: &mut DatabaseConnection,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Object>, sqlx::Error> {
        let sql = format!(
            "SELECT {COLUMNS} FROM objects o
             WHERE o.parent_id IS ? AND o.name = ? AND o.is_deleted = 0 AND o.is_expunged = 0
             ORDER BY o.created_date
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(parent_id.map(|p| p.to_string()))
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(object_from_row).transpose()
    }

    pub async fn children(
        conn: &mut DatabaseConnection,
        parent_id: Option<Uuid>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Object>, sqlx::Error> {
        let sql = format!(
            "SELECT {COLUMNS} FROM objects o
             WHERE o.parent_id IS ? AND o.is_deleted = 0 AND o.is_expunged = 0
             ORDER BY o.name, o.id
             LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id.map(|p| p.to_string()))
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(object_from_row).collect()
    }

    /// Every object below `id`, nearest first. `id` itself is excluded.
    pub async fn descendants(
        conn: &mut DatabaseConnection,
        id: Uuid,
    ) -> Result<Vec<Object>, sqlx::Error> {
        let sql = format!(
            "WITH RECURSIVE tree(id, depth) AS (
                 SELECT id, 1 FROM objects WHERE parent_id = ?
                 UNION ALL
                 SELECT c.id, tree.depth + 1 FROM objects c JOIN tree ON c.parent_id = tree.id
             )
             SELECT {COLUMNS} FROM objects o JOIN tree ON o.id = tree.id
             ORDER BY tree.depth"
        );
        let rows = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(object_from_row).collect()
    }

    /// Ancestors of `object`, root first.
    pub async fn ancestors(
        conn: &mut DatabaseConnection,
        object: &Object,
    ) -> Result<Vec<Object>, sqlx::Error> {
        let mut chain = Vec::new();
        let mut next = object.parent_id;
        while let Some(parent_id) = next {
            if parent_id == object.id || chain.iter().any(|o: &Object| o.id == parent_id) {
                tracing::error!(object_id = %object.id, %parent_id, "cycle in object tree");
                break;
            }
            let Some(parent) = Self::get(conn, parent_id).await? else {
                break;
            };
            next = parent.parent_id;
            chain.push(parent);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Candidates for grantee-driven listings. Callers still filter on
    /// MAC-valid capabilities.
    pub async fn by_grantees(
        conn: &mut DatabaseConnection,
        kind: ListKind,
        owner: &ResourceString,
        grantees: &[String],
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Object>, sqlx::Error> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        query.push(COLUMNS);
        query.push(
            " FROM objects o WHERE o.is_deleted = 0 AND o.is_expunged = 0 AND EXISTS (
                SELECT 1 FROM object_permissions p
                WHERE p.object_id = o.id AND p.is_deleted = 0 AND ",
        );
        match kind {
            ListKind::SharedWithCaller => {
                query.push("p.grantee != '-Everyone' AND p.grantee IN (");
                let mut separated = query.separated(", ");
                for grantee in grantees {
                    separated.push_bind(grantee.clone());
                }
                if grantees.is_empty() {
                    separated.push("NULL");
                }
                query.push(")) AND o.owned_by != ");
                query.push_bind(owner.to_string());
            }
            ListKind::SharedByCaller => {
                query.push("p.grantee != '-Everyone' AND p.grantee != ");
                query.push_bind(owner.grantee());
                query.push(") AND o.owned_by = ");
                query.push_bind(owner.to_string());
            }
            ListKind::Public => {
                query.push("p.grantee = '-Everyone')");
            }
        }
        query.push(" ORDER BY o.modified_date DESC, o.id LIMIT ");
        query.push_bind(limit as i64);
        query.push(" OFFSET ");
        query.push_bind(offset as i64);

        let rows = query.build().fetch_all(&mut *conn).await?;
        rows.iter().map(object_from_row).collect()
    }

    pub async fn trashed(
        conn: &mut DatabaseConnection,
        owner: &ResourceString,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Object>, sqlx::Error> {
        let sql = format!(
            "SELECT {COLUMNS} FROM objects o
             WHERE o.owned_by = ? AND o.is_deleted = 1 AND o.is_expunged = 0
             ORDER BY o.modified_date DESC, o.id
             LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(owner.to_string())
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(object_from_row).collect()
    }

    /// Live objects whose name or description contains `needle`.
    pub async fn search(
        conn: &mut DatabaseConnection,
        needle: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Object>, sqlx::Error> {
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        let sql = format!(
            "SELECT {COLUMNS} FROM objects o
             WHERE (o.name LIKE ? ESCAPE '\\' OR o.description LIKE ? ESCAPE '\\')
               AND o.is_deleted = 0 AND o.is_ancestor_deleted = 0 AND o.is_expunged = 0
             ORDER BY o.name, o.id
             LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(object_from_row).collect()
    }

    /// Set `is_ancestor_deleted` on every object below `id`, without
    /// touching their change tokens. Returns rows changed.
    pub async fn mark_descendants(
        conn: &mut DatabaseConnection,
        id: Uuid,
        ancestor_deleted: bool,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            WITH RECURSIVE tree(id) AS (
                SELECT id FROM objects WHERE parent_id = ?
                UNION ALL
                SELECT c.id FROM objects c JOIN tree ON c.parent_id = tree.id
            )
            UPDATE objects SET is_ancestor_deleted = ?
            WHERE id IN (SELECT id FROM tree)
            "#,
        )
        .bind(id.to_string())
        .bind(ancestor_deleted)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_owned_by(
        conn: &mut DatabaseConnection,
        owner: &ResourceString,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM objects WHERE owned_by = ? AND is_expunged = 0",
        )
        .bind(owner.to_string())
        .fetch_one(&mut *conn)
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::database::Database;

    fn object(name: &str, parent_id: Option<Uuid>) -> Object {
        let now = Utc::now();
        Object {
            id: Uuid::new_v4(),
            type_name: "Folder".into(),
            name: name.into(),
            description: String::new(),
            parent_id,
            owned_by: ResourceString::user("CN=alice"),
            acm: json!({"classif": "U"}).try_into().unwrap(),
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
        }
    }

    #[tokio::test]
    async fn test_insert_get_update() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();

        let mut obj = object("docs", None);
        obj.content_connector = Some(FileId::generate());
        obj.encrypt_iv = Some(StreamIv::generate());
        obj.properties.insert("color".into(), "blue".into());
        ObjectQueries::insert(&mut conn, &obj).await.unwrap();

        let loaded = ObjectQueries::get(&mut conn, obj.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "docs");
        assert_eq!(loaded.content_connector, obj.content_connector);
        assert_eq!(loaded.encrypt_iv, obj.encrypt_iv);
        assert_eq!(loaded.properties["color"], "blue");
        assert_eq!(loaded.acm, obj.acm);

        obj.name = "renamed".into();
        obj.flags.is_deleted = true;
        ObjectQueries::update(&mut conn, &obj).await.unwrap();
        let loaded = ObjectQueries::get(&mut conn, obj.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        assert!(loaded.flags.is_deleted);

        assert!(ObjectQueries::get(&mut conn, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tree_walks() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();

        let a = object("a", None);
        let b = object("b", Some(a.id));
        let c = object("c", Some(b.id));
        for o in [&a, &b, &c] {
            ObjectQueries::insert(&mut conn, o).await.unwrap();
        }

        let below: Vec<Uuid> = ObjectQueries::descendants(&mut conn, a.id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(below, vec![b.id, c.id]);

        let above: Vec<Uuid> = ObjectQueries::ancestors(&mut conn, &c)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(above, vec![a.id, b.id]);

        let found = ObjectQueries::find_child(&mut conn, Some(a.id), "b")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, b.id);
        assert!(ObjectQueries::find_child(&mut conn, None, "b")
            .await
            .unwrap()
            .is_none());

        let roots = ObjectQueries::children(&mut conn, None, 10, 0).await.unwrap();
        assert_eq!(roots.len(), 1);

        let hits = ObjectQueries::search(&mut conn, "c", 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            ObjectQueries::count_owned_by(&mut conn, &ResourceString::user("CN=alice"))
                .await
                .unwrap(),
            3
        );
    }
}
