//! Local request surface for co-located components.
//!
//! This crate is the inward-facing contract of the shadow engine: typed
//! request/response DTOs, the [`LocalShadowService`] that validates and
//! executes get/update/delete/list operations, and a broadcast-based
//! [`LocalEventBus`]. The transport itself (payload framing, connection
//! handling) belongs to the host runtime; any transport that can carry
//! these DTOs and a caller name can front this service.

pub mod events;
pub mod pipeline;
pub mod requests;
pub mod service;

pub use events::{shadow_topic, LocalEventBus, TopicKind};
pub use pipeline::{build_engine, ShadowEngine};
pub use requests::{
    DeleteThingShadowRequest, GetThingShadowRequest, GetThingShadowResponse,
    ListNamedShadowsForThingRequest, ListNamedShadowsForThingResponse, ServiceError,
    UpdateThingShadowRequest, UpdateThingShadowResponse,
};
pub use service::{AllowAllAuthorizer, LocalShadowService, ShadowAuthorizer};
