//! Persistent store port (driven/secondary port).
//!
//! Any ordered key-value engine can back this trait; the workspace ships a
//! SQLite adapter in `umbra-store`. Two logical tables exist: local shadow
//! documents and per-identity sync records, both keyed by
//! `(thing_name, shadow_name)`.
//!
//! ## Design Notes
//!
//! - Operations return typed [`SyncError`] values because the sync loop
//!   classifies storage failures (they are fatal, unlike transient cloud
//!   failures).
//! - Document deletion is soft: the row remains as a tombstone carrying the
//!   last version, so a re-created shadow continues at `version + 1`.
//! - `update_shadow` is linearizable per identity; updates to different
//!   identities may proceed in parallel.

use crate::domain::{ShadowDocument, ShadowIdentity, ShadowName, SyncError, SyncRecord, ThingName};

/// One page of named shadow names for a thing, in lexical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedShadowPage {
    /// Shadow names in this page.
    pub names: Vec<ShadowName>,
    /// Opaque cursor for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Port trait for shadow document and sync record persistence.
#[async_trait::async_trait]
pub trait ShadowStore: Send + Sync {
    /// Applies pending schema migrations. Called exactly once at startup;
    /// failure is fatal for the component.
    async fn migrate(&self) -> Result<(), SyncError>;

    /// Fetches the document for an identity. Tombstoned and absent rows
    /// both yield `None`.
    async fn get_shadow(&self, id: &ShadowIdentity) -> Result<Option<ShadowDocument>, SyncError>;

    /// Stores a new document version and returns the stored document.
    ///
    /// For an existing live row the document must carry `stored + 1`, or
    /// the call fails with [`SyncError::VersionConflict`]. Writing over a
    /// tombstone continues the version sequence at `tombstone + 1`
    /// regardless of the version carried; the returned document reflects
    /// the version actually stored.
    async fn update_shadow(
        &self,
        id: &ShadowIdentity,
        doc: &ShadowDocument,
    ) -> Result<ShadowDocument, SyncError>;

    /// Soft-deletes the document, keeping a tombstone with the last
    /// version. Returns whether a live document existed.
    async fn delete_shadow(&self, id: &ShadowIdentity) -> Result<bool, SyncError>;

    /// Lists the named shadows of a thing in lexical order.
    ///
    /// `token` is an opaque cursor from a previous page; an unrecognized
    /// token fails with [`SyncError::InvalidArguments`].
    async fn list_named(
        &self,
        thing: &ThingName,
        page_size: u32,
        token: Option<&str>,
    ) -> Result<NamedShadowPage, SyncError>;

    /// Fetches the sync record for an identity.
    async fn get_sync(&self, id: &ShadowIdentity) -> Result<Option<SyncRecord>, SyncError>;

    /// Inserts or replaces the sync record for an identity.
    async fn put_sync(&self, id: &ShadowIdentity, record: &SyncRecord) -> Result<(), SyncError>;

    /// Removes the sync record for an identity.
    async fn clear_sync(&self, id: &ShadowIdentity) -> Result<(), SyncError>;
}
