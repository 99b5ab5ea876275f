//! Core domain model and ports for Umbra.
//!
//! Umbra keeps locally stored JSON shadow documents synchronized with their
//! cloud counterparts. This crate holds everything the rest of the workspace
//! agrees on:
//!
//! - the validated domain model (`domain`): shadow identities, the versioned
//!   shadow document with its update/delete operations, sync bookkeeping
//!   records, sync request variants, and the error taxonomy;
//! - typed configuration (`config`) parsed from the host-supplied settings
//!   map or a YAML file;
//! - the port traits (`ports`) the adapters implement: persistent store,
//!   cloud client, connectivity probe, disk usage source, and the local
//!   event bus.
//!
//! No I/O happens here; adapters live in `umbra-store`, `umbra-sync`, and
//! `umbra-ipc`.

pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{
    document::{ShadowDocument, ShadowState, UpdateOutcome, UpdatePayload},
    errors::{DomainError, ErrorClass, SyncError},
    name::{ClientToken, ShadowIdentity, ShadowName, ThingName},
    request::SyncRequest,
    sync_record::SyncRecord,
    SyncDirection,
};
