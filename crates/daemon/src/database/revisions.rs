use sqlx::Row;
use uuid::Uuid;

use common::prelude::Revision;

use super::{decode, DatabaseConnection};

pub struct RevisionQueries;

impl RevisionQueries {
    pub async fn insert(
        conn: &mut DatabaseConnection,
        revision: &Revision,
    ) -> Result<(), sqlx::Error> {
        let snapshot = decode("snapshot", serde_json::to_string(revision))?;
        sqlx::query(
            r#"
            INSERT INTO object_revisions (object_id, change_count, snapshot, created_date)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(revision.object_id.to_string())
        .bind(revision.change_count)
        .bind(snapshot)
        .bind(revision.modified_date)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// All revisions of `object_id`, newest first.
    pub async fn list(
        conn: &mut DatabaseConnection,
        object_id: Uuid,
    ) -> Result<Vec<Revision>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot FROM object_revisions
            WHERE object_id = ?
            ORDER BY change_count DESC
            "#,
        )
        .bind(object_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| {
                let snapshot: String = row.try_get("snapshot")?;
                decode("snapshot", serde_json::from_str::<Revision>(&snapshot))
            })
            .collect()
    }

    pub async fn get(
        conn: &mut DatabaseConnection,
        object_id: Uuid,
        change_count: i64,
    ) -> Result<Option<Revision>, sqlx::Error> {
        let snapshot: Option<String> = sqlx::query_scalar(
            "SELECT snapshot FROM object_revisions WHERE object_id = ? AND change_count = ?",
        )
        .bind(object_id.to_string())
        .bind(change_count)
        .fetch_optional(&mut *conn)
        .await?;

        snapshot
            .map(|s| decode("snapshot", serde_json::from_str::<Revision>(&s)))
            .transpose()
    }
}
