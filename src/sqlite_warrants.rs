//! SQLite-backed [`WarrantBackend`].
//!
//! Warrants live in the `warrants` table keyed by all five tuple fields, so a
//! repeated create is absorbed by `ON CONFLICT DO NOTHING`. Every write that
//! changes a row appends to `warrant_changes` in the same transaction; the
//! highest revision in that log is the store revision handed back to callers.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use gated_context_core::error::{GateError, GateResult};
use gated_context_core::models::{
    Consistency, ResourceRef, Revision, Subject, Warrant, WarrantFilter,
};
use gated_context_core::store::WarrantBackend;

pub struct SqliteWarrantBackend {
    pool: SqlitePool,
}

impl SqliteWarrantBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn store_err(e: sqlx::Error) -> GateError {
    GateError::StoreUnavailable(e.to_string())
}

fn row_to_warrant(row: &SqliteRow) -> Warrant {
    Warrant::new(
        ResourceRef::new(
            row.get::<String, _>("resource_type"),
            row.get::<String, _>("resource_id"),
        ),
        row.get::<String, _>("relation"),
        Subject::new(
            row.get::<String, _>("subject_type"),
            row.get::<String, _>("subject_id"),
        ),
    )
}

async fn current_revision<'e, E>(executor: E) -> GateResult<Revision>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rev: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(revision), 0) FROM warrant_changes")
        .fetch_one(executor)
        .await
        .map_err(store_err)?;
    Ok(Revision(rev.max(0) as u64))
}

async fn log_change(
    tx: &mut Transaction<'_, Sqlite>,
    op: &str,
    warrant: &Warrant,
) -> GateResult<()> {
    sqlx::query(
        r#"
        INSERT INTO warrant_changes (op, resource_type, resource_id, relation,
                                     subject_type, subject_id, changed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(op)
    .bind(&warrant.resource.resource_type)
    .bind(&warrant.resource.resource_id)
    .bind(&warrant.relation)
    .bind(&warrant.subject.subject_type)
    .bind(&warrant.subject.subject_id)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut **tx)
    .await
    .map_err(store_err)?;
    Ok(())
}

#[async_trait]
impl WarrantBackend for SqliteWarrantBackend {
    async fn put(&self, warrant: &Warrant) -> GateResult<Revision> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO warrants (resource_type, resource_id, relation,
                                  subject_type, subject_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&warrant.resource.resource_type)
        .bind(&warrant.resource.resource_id)
        .bind(&warrant.relation)
        .bind(&warrant.subject.subject_type)
        .bind(&warrant.subject.subject_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?
        .rows_affected();

        if inserted > 0 {
            log_change(&mut tx, "create", warrant).await?;
        }
        let revision = current_revision(&mut *tx).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(revision)
    }

    async fn delete(&self, warrant: &Warrant) -> GateResult<Revision> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM warrants
            WHERE resource_type = ? AND resource_id = ? AND relation = ?
              AND subject_type = ? AND subject_id = ?
            "#,
        )
        .bind(&warrant.resource.resource_type)
        .bind(&warrant.resource.resource_id)
        .bind(&warrant.relation)
        .bind(&warrant.subject.subject_type)
        .bind(&warrant.subject.subject_id)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?
        .rows_affected();

        if deleted > 0 {
            log_change(&mut tx, "delete", warrant).await?;
        }
        let revision = current_revision(&mut *tx).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(revision)
    }

    async fn read(
        &self,
        filter: &WarrantFilter,
        consistency: Consistency,
    ) -> GateResult<Vec<Warrant>> {
        // Single primary: any revision this database handed out is visible.
        if let Consistency::AtLeast(wanted) = consistency {
            let current = current_revision(&self.pool).await?;
            if wanted > current {
                return Err(GateError::StoreUnavailable(format!(
                    "revision {} not yet visible (at {})",
                    wanted, current
                )));
            }
        }

        let (subject_type, subject_id) = match &filter.subject {
            Some(s) => (Some(s.subject_type.as_str()), Some(s.subject_id.as_str())),
            None => (None, None),
        };

        let rows = sqlx::query(
            r#"
            SELECT resource_type, resource_id, relation, subject_type, subject_id
            FROM warrants
            WHERE (?1 IS NULL OR resource_type = ?1)
              AND (?2 IS NULL OR resource_id = ?2)
              AND (?3 IS NULL OR relation = ?3)
              AND (?4 IS NULL OR subject_type = ?4)
              AND (?5 IS NULL OR subject_id = ?5)
            ORDER BY resource_type, resource_id, relation, subject_type, subject_id
            "#,
        )
        .bind(filter.resource_type.as_deref())
        .bind(filter.resource_id.as_deref())
        .bind(filter.relation.as_deref())
        .bind(subject_type)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.iter().map(row_to_warrant).collect())
    }

    async fn revision(&self) -> GateResult<Revision> {
        current_revision(&self.pool).await
    }
}
