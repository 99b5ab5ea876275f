//! The local shadow request service.
//!
//! Implements the four operations co-located components call:
//! get, update, delete, and list-named-shadows. Every call runs the same
//! admission pipeline (name validation, authorization, local rate limits,
//! and, for writes, the disk capacity gate) before touching the store
//! under the shadow's write lock. Accepted updates publish accepted,
//! delta, and documents events; every failed operation publishes a reject
//! event carrying the timestamp, the echoed client token, and the error.
//!
//! Accepted writes are handed to the sync handler, which queues the
//! matching cloud push.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use umbra_core::config::ComponentConfig;
use umbra_core::ports::{ShadowEvent, ShadowEventBus, ShadowOperation, ShadowStore};
use umbra_core::{
    ClientToken, DomainError, ShadowIdentity, SyncError, ThingName, UpdatePayload,
};
use umbra_store::CapacityGate;
use umbra_sync::{ShadowLockRegistry, SyncHandler, TokenBucket};

use crate::requests::{
    DeleteThingShadowRequest, GetThingShadowRequest, GetThingShadowResponse,
    ListNamedShadowsForThingRequest, ListNamedShadowsForThingResponse, ServiceError,
    UpdateThingShadowRequest, UpdateThingShadowResponse,
};

/// Default page size for named shadow listings.
const DEFAULT_PAGE_SIZE: u32 = 25;

/// Largest page size a caller may request.
const MAX_PAGE_SIZE: u32 = 100;

/// Authorization hook consulted before every operation.
///
/// The host runtime supplies the real policy engine; the default
/// [`AllowAllAuthorizer`] admits everything.
#[async_trait::async_trait]
pub trait ShadowAuthorizer: Send + Sync {
    /// Checks whether `caller` may perform `operation` on `identity`.
    async fn authorize(
        &self,
        caller: &str,
        operation: ShadowOperation,
        identity: &ShadowIdentity,
    ) -> Result<(), ServiceError>;
}

/// Authorizer that admits every caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthorizer;

#[async_trait::async_trait]
impl ShadowAuthorizer for AllowAllAuthorizer {
    async fn authorize(
        &self,
        _caller: &str,
        _operation: ShadowOperation,
        _identity: &ShadowIdentity,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// The inward-facing shadow service.
pub struct LocalShadowService {
    store: Arc<dyn ShadowStore>,
    locks: Arc<ShadowLockRegistry>,
    gate: CapacityGate,
    events: Arc<dyn ShadowEventBus>,
    handler: Arc<SyncHandler>,
    authorizer: Arc<dyn ShadowAuthorizer>,
    total_limit: TokenBucket,
    per_thing: DashMap<ThingName, Arc<TokenBucket>>,
    per_thing_rate: u32,
    max_document_size: usize,
    enroll_on_interaction: bool,
}

impl LocalShadowService {
    /// Creates the service. Rate and size limits come from the component
    /// configuration.
    pub fn new(
        store: Arc<dyn ShadowStore>,
        locks: Arc<ShadowLockRegistry>,
        gate: CapacityGate,
        events: Arc<dyn ShadowEventBus>,
        handler: Arc<SyncHandler>,
        authorizer: Arc<dyn ShadowAuthorizer>,
        config: &ComponentConfig,
    ) -> Self {
        Self {
            store,
            locks,
            gate,
            events,
            handler,
            authorizer,
            total_limit: TokenBucket::per_second(config.rate_limits.max_total_local_requests_rate),
            per_thing: DashMap::new(),
            per_thing_rate: config.rate_limits.max_local_requests_per_second_per_thing,
            max_document_size: config.shadow_document_size_limit_bytes,
            enroll_on_interaction: false,
        }
    }

    /// Enrolls identities for synchronization the first time a write
    /// touches them.
    pub fn with_dynamic_enrollment(mut self, enabled: bool) -> Self {
        self.enroll_on_interaction = enabled;
        self
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Reads one shadow document.
    pub async fn get_thing_shadow(
        &self,
        caller: &str,
        request: &GetThingShadowRequest,
    ) -> Result<GetThingShadowResponse, ServiceError> {
        let identity = parse_identity(&request.thing_name, &request.shadow_name)?;
        match self.do_get(caller, &identity).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.reject(&identity, ShadowOperation::Get, None, &err).await;
                Err(err)
            }
        }
    }

    /// Applies a state patch to one shadow document.
    pub async fn update_thing_shadow(
        &self,
        caller: &str,
        request: &UpdateThingShadowRequest,
    ) -> Result<UpdateThingShadowResponse, ServiceError> {
        let identity = parse_identity(&request.thing_name, &request.shadow_name)?;
        let parsed = UpdatePayload::from_slice(&request.payload);
        let client_token = parsed.as_ref().ok().and_then(|u| u.client_token.clone());

        match self.do_update(caller, &identity, parsed).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.reject(&identity, ShadowOperation::Update, client_token, &err)
                    .await;
                Err(err)
            }
        }
    }

    /// Deletes one shadow document (soft delete; the version is retained).
    pub async fn delete_thing_shadow(
        &self,
        caller: &str,
        request: &DeleteThingShadowRequest,
    ) -> Result<(), ServiceError> {
        let identity = parse_identity(&request.thing_name, &request.shadow_name)?;
        match self.do_delete(caller, &identity).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.reject(&identity, ShadowOperation::Delete, None, &err)
                    .await;
                Err(err)
            }
        }
    }

    /// Lists the named shadows of a thing, lexically ordered.
    pub async fn list_named_shadows_for_thing(
        &self,
        caller: &str,
        request: &ListNamedShadowsForThingRequest,
    ) -> Result<ListNamedShadowsForThingResponse, ServiceError> {
        let thing = ThingName::new(&request.thing_name)
            .map_err(|e| ServiceError::InvalidArguments(e.to_string()))?;
        let identity = ShadowIdentity::classic(thing.clone());

        match self.do_list(caller, &identity, request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.reject(&identity, ShadowOperation::List, None, &err).await;
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    async fn do_get(
        &self,
        caller: &str,
        identity: &ShadowIdentity,
    ) -> Result<GetThingShadowResponse, ServiceError> {
        self.authorizer
            .authorize(caller, ShadowOperation::Get, identity)
            .await?;
        self.admit(&identity.thing)?;

        let doc = self
            .store
            .get_shadow(identity)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::ResourceNotFound(identity.to_string()))?;

        Ok(GetThingShadowResponse {
            payload: doc.to_bytes().map_err(domain_error)?,
        })
    }

    async fn do_update(
        &self,
        caller: &str,
        identity: &ShadowIdentity,
        parsed: Result<UpdatePayload, DomainError>,
    ) -> Result<UpdateThingShadowResponse, ServiceError> {
        let update = parsed.map_err(domain_error)?;

        self.authorizer
            .authorize(caller, ShadowOperation::Update, identity)
            .await?;
        self.admit(&identity.thing)?;

        if self.gate.is_exceeded() {
            return Err(ServiceError::ServiceError(
                "local shadow storage capacity exceeded".into(),
            ));
        }

        let lock = self.locks.lock_for(identity);
        let _guard = lock.lock().await;

        let source = self
            .store
            .get_shadow(identity)
            .await
            .map_err(ServiceError::from)?
            .unwrap_or_default();

        let outcome = source
            .apply_update(&update, self.max_document_size)
            .map_err(domain_error)?;

        let stored = self
            .store
            .update_shadow(identity, &outcome.document)
            .await
            .map_err(ServiceError::from)?;

        debug!(%identity, version = stored.version, "Accepted shadow update");

        let now = stored.timestamp;
        self.publish(ShadowEvent::Accepted {
            identity: identity.clone(),
            operation: ShadowOperation::Update,
            timestamp: now,
            client_token: stored.client_token.clone(),
        })
        .await;

        if let Some(delta) = &outcome.delta {
            self.publish(ShadowEvent::Delta {
                identity: identity.clone(),
                delta: delta.clone(),
                version: stored.version,
                timestamp: now,
            })
            .await;
        }

        let previous = if source.new_document {
            None
        } else {
            serde_json::to_value(&source).ok()
        };
        if let Ok(current) = serde_json::to_value(&stored) {
            self.publish(ShadowEvent::Documents {
                identity: identity.clone(),
                previous,
                current,
                timestamp: now,
            })
            .await;
        }

        if self.enroll_on_interaction {
            self.handler.enroll(identity.clone()).await;
        }
        self.handler
            .on_local_update(identity.clone(), update.state.clone(), stored.version)
            .await;

        Ok(UpdateThingShadowResponse {
            payload: stored.to_bytes().map_err(domain_error)?,
        })
    }

    async fn do_delete(&self, caller: &str, identity: &ShadowIdentity) -> Result<(), ServiceError> {
        self.authorizer
            .authorize(caller, ShadowOperation::Delete, identity)
            .await?;
        self.admit(&identity.thing)?;

        let lock = self.locks.lock_for(identity);
        let _guard = lock.lock().await;

        let existed = self
            .store
            .delete_shadow(identity)
            .await
            .map_err(ServiceError::from)?;
        if !existed {
            return Err(ServiceError::ResourceNotFound(identity.to_string()));
        }

        info!(%identity, "Accepted shadow delete");

        self.publish(ShadowEvent::Accepted {
            identity: identity.clone(),
            operation: ShadowOperation::Delete,
            timestamp: Utc::now().timestamp(),
            client_token: None,
        })
        .await;

        if self.enroll_on_interaction {
            self.handler.enroll(identity.clone()).await;
        }
        self.handler.on_local_delete(identity.clone()).await;

        Ok(())
    }

    async fn do_list(
        &self,
        caller: &str,
        identity: &ShadowIdentity,
        request: &ListNamedShadowsForThingRequest,
    ) -> Result<ListNamedShadowsForThingResponse, ServiceError> {
        self.authorizer
            .authorize(caller, ShadowOperation::List, identity)
            .await?;
        self.admit(&identity.thing)?;

        let page_size = request.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ServiceError::InvalidArguments(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let page = self
            .store
            .list_named(&identity.thing, page_size, request.next_token.as_deref())
            .await
            .map_err(ServiceError::from)?;

        Ok(ListNamedShadowsForThingResponse {
            results: page
                .names
                .into_iter()
                .map(|n| n.as_str().to_string())
                .collect(),
            next_token: page.next_token,
            timestamp: Utc::now().timestamp(),
        })
    }

    // ------------------------------------------------------------------
    // Admission and events
    // ------------------------------------------------------------------

    fn admit(&self, thing: &ThingName) -> Result<(), ServiceError> {
        if !self.total_limit.try_acquire() {
            return Err(ServiceError::Throttled(
                "total local shadow request rate exceeded".into(),
            ));
        }
        let bucket = self
            .per_thing
            .entry(thing.clone())
            .or_insert_with(|| Arc::new(TokenBucket::per_second(self.per_thing_rate)))
            .clone();
        if !bucket.try_acquire() {
            return Err(ServiceError::Throttled(format!(
                "local shadow request rate exceeded for thing {thing}"
            )));
        }
        Ok(())
    }

    async fn reject(
        &self,
        identity: &ShadowIdentity,
        operation: ShadowOperation,
        client_token: Option<ClientToken>,
        error: &ServiceError,
    ) {
        warn!(%identity, ?operation, error = %error, "Rejected shadow request");
        self.publish(ShadowEvent::Rejected {
            identity: identity.clone(),
            operation,
            timestamp: Utc::now().timestamp(),
            client_token,
            error: error.to_string(),
        })
        .await;
    }

    async fn publish(&self, event: ShadowEvent) {
        if let Err(err) = self.events.publish(event).await {
            debug!(error = %err, "Failed to publish shadow event");
        }
    }
}

fn parse_identity(thing: &str, shadow: &str) -> Result<ShadowIdentity, ServiceError> {
    ShadowIdentity::parse(thing, shadow).map_err(|e| ServiceError::InvalidArguments(e.to_string()))
}

fn domain_error(err: DomainError) -> ServiceError {
    ServiceError::from(SyncError::from(err))
}
