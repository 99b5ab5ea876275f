//! SQLite implementation of the `ShadowStore` port.
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                  |
//! |-----------------|----------|-------------------------------------------|
//! | ThingName       | TEXT     | string via `.as_str()` / `ThingName::new` |
//! | ShadowName      | TEXT     | string, empty for the classic shadow      |
//! | ShadowDocument  | TEXT     | serde_json serialization                  |
//! | SyncRecord      | columns  | one column per field                      |
//! | versions        | INTEGER  | `u64` narrowed through `i64`              |
//!
//! Document deletion is soft: a tombstone row keeps the last version with a
//! NULL document, and a later re-creation continues the version sequence at
//! `version + 1`.

use sqlx::Row;
use tracing::debug;

use umbra_core::ports::{NamedShadowPage, ShadowStore};
use umbra_core::{ShadowDocument, ShadowIdentity, ShadowName, SyncError, SyncRecord, ThingName};

use crate::{DatabasePool, StoreError};

/// Maximum page size accepted by `list_named`.
const MAX_PAGE_SIZE: u32 = 100;

/// SQLite-based implementation of the shadow store port.
///
/// All operations run through a connection pool; per-identity
/// linearizability of `update_shadow` comes from the read-check-write
/// transaction combined with SQLite's single-writer locking.
pub struct SqliteShadowStore {
    db: DatabasePool,
}

impl SqliteShadowStore {
    /// Creates a new store over the given pool.
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    fn decode_document(
        text: &str,
        version: u64,
        update_time: i64,
    ) -> Result<ShadowDocument, StoreError> {
        let mut doc: ShadowDocument = serde_json::from_str(text)
            .map_err(|e| StoreError::SerializationError(format!("invalid stored document: {e}")))?;
        // The columns are authoritative for bookkeeping fields.
        doc.version = version;
        doc.timestamp = update_time;
        doc.new_document = false;
        doc.deleted = false;
        Ok(doc)
    }
}

#[async_trait::async_trait]
impl ShadowStore for SqliteShadowStore {
    async fn migrate(&self) -> Result<(), SyncError> {
        DatabasePool::run_migrations(self.db.pool())
            .await
            .map_err(SyncError::from)
    }

    async fn get_shadow(&self, id: &ShadowIdentity) -> Result<Option<ShadowDocument>, SyncError> {
        let row = sqlx::query(
            "SELECT document, version, deleted, update_time
             FROM documents WHERE thing_name = ? AND shadow_name = ?",
        )
        .bind(id.thing.as_str())
        .bind(id.shadow.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let deleted: i64 = row.get("deleted");
        if deleted != 0 {
            return Ok(None);
        }

        let text: Option<String> = row.get("document");
        let text = text.ok_or_else(|| {
            StoreError::SerializationError(format!("live document row without content for {id}"))
        })?;
        let version: i64 = row.get("version");
        let update_time: i64 = row.get("update_time");

        Ok(Some(Self::decode_document(
            &text,
            version as u64,
            update_time,
        )?))
    }

    async fn update_shadow(
        &self,
        id: &ShadowIdentity,
        doc: &ShadowDocument,
    ) -> Result<ShadowDocument, SyncError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let existing = sqlx::query(
            "SELECT version, deleted FROM documents
             WHERE thing_name = ? AND shadow_name = ?",
        )
        .bind(id.thing.as_str())
        .bind(id.shadow.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let stored_version: u64 = match existing {
            None => doc.version.max(1),
            Some(row) => {
                let current = row.get::<i64, _>("version") as u64;
                let deleted: i64 = row.get("deleted");
                if deleted != 0 {
                    // Re-creation over a tombstone continues the sequence.
                    current + 1
                } else if doc.version == current + 1 {
                    doc.version
                } else {
                    return Err(SyncError::VersionConflict {
                        expected: current + 1,
                        actual: doc.version,
                    });
                }
            }
        };

        let mut stored = doc.clone();
        stored.version = stored_version;
        stored.new_document = false;
        stored.deleted = false;

        let text = serde_json::to_string(&stored)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO documents (thing_name, shadow_name, document, version, deleted, update_time)
             VALUES (?, ?, ?, ?, 0, ?)
             ON CONFLICT (thing_name, shadow_name) DO UPDATE SET
                 document = excluded.document,
                 version = excluded.version,
                 deleted = 0,
                 update_time = excluded.update_time",
        )
        .bind(id.thing.as_str())
        .bind(id.shadow.as_str())
        .bind(&text)
        .bind(stored_version as i64)
        .bind(stored.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        debug!(identity = %id, version = stored_version, "Stored shadow document");

        Ok(stored)
    }

    async fn delete_shadow(&self, id: &ShadowIdentity) -> Result<bool, SyncError> {
        let result = sqlx::query(
            "UPDATE documents
             SET deleted = 1, document = NULL, update_time = strftime('%s','now')
             WHERE thing_name = ? AND shadow_name = ? AND deleted = 0",
        )
        .bind(id.thing.as_str())
        .bind(id.shadow.as_str())
        .execute(self.db.pool())
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let existed = result.rows_affected() > 0;
        if existed {
            debug!(identity = %id, "Tombstoned shadow document");
        }
        Ok(existed)
    }

    async fn list_named(
        &self,
        thing: &ThingName,
        page_size: u32,
        token: Option<&str>,
    ) -> Result<NamedShadowPage, SyncError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        // The cursor is the last name of the previous page; it has to be a
        // name this store could have produced.
        let after = match token {
            None => String::new(),
            Some(raw) => ShadowName::new(raw)
                .map_err(|_| SyncError::InvalidArguments("invalid pagination token".into()))?
                .as_str()
                .to_string(),
        };

        let rows = sqlx::query(
            "SELECT shadow_name FROM documents
             WHERE thing_name = ? AND shadow_name > ? AND deleted = 0
             ORDER BY shadow_name
             LIMIT ?",
        )
        .bind(thing.as_str())
        .bind(&after)
        .bind((page_size + 1) as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut names: Vec<ShadowName> = rows
            .iter()
            .map(|row| {
                let name: String = row.get("shadow_name");
                ShadowName::new(name)
                    .map_err(|e| StoreError::SerializationError(e.to_string()).into())
            })
            .collect::<Result<_, SyncError>>()?;

        let next_token = if names.len() > page_size as usize {
            names.truncate(page_size as usize);
            names.last().map(|n| n.as_str().to_string())
        } else {
            None
        };

        Ok(NamedShadowPage { names, next_token })
    }

    async fn get_sync(&self, id: &ShadowIdentity) -> Result<Option<SyncRecord>, SyncError> {
        let row = sqlx::query(
            "SELECT cloud_document, cloud_version, cloud_deleted, cloud_update_time,
                    local_version, last_sync_time
             FROM sync WHERE thing_name = ? AND shadow_name = ?",
        )
        .bind(id.thing.as_str())
        .bind(id.shadow.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(row.map(|row| SyncRecord {
            cloud_document: row.get::<Option<Vec<u8>>, _>("cloud_document"),
            cloud_version: row.get::<i64, _>("cloud_version") as u64,
            cloud_deleted: row.get::<i64, _>("cloud_deleted") != 0,
            cloud_update_time: row.get("cloud_update_time"),
            local_version: row.get::<i64, _>("local_version") as u64,
            last_sync_time: row.get("last_sync_time"),
        }))
    }

    async fn put_sync(&self, id: &ShadowIdentity, record: &SyncRecord) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO sync (thing_name, shadow_name, cloud_document, cloud_version,
                               cloud_deleted, cloud_update_time, local_version, last_sync_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (thing_name, shadow_name) DO UPDATE SET
                 cloud_document = excluded.cloud_document,
                 cloud_version = excluded.cloud_version,
                 cloud_deleted = excluded.cloud_deleted,
                 cloud_update_time = excluded.cloud_update_time,
                 local_version = excluded.local_version,
                 last_sync_time = excluded.last_sync_time",
        )
        .bind(id.thing.as_str())
        .bind(id.shadow.as_str())
        .bind(record.cloud_document.as_deref())
        .bind(record.cloud_version as i64)
        .bind(record.cloud_deleted as i64)
        .bind(record.cloud_update_time)
        .bind(record.local_version as i64)
        .bind(record.last_sync_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn clear_sync(&self, id: &ShadowIdentity) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync WHERE thing_name = ? AND shadow_name = ?")
            .bind(id.thing.as_str())
            .bind(id.shadow.as_str())
            .execute(self.db.pool())
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }
}
