//! End-to-end tests for the local shadow service: real SQLite store,
//! fake cloud client, live event bus, and the full sync pipeline.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use umbra_core::config::ComponentConfig;
use umbra_core::ports::{
    CloudDocument, CloudShadowClient, NullEventBus, ShadowEvent, ShadowOperation,
    SharedConnectivity, ShadowStore,
};
use umbra_core::{ShadowIdentity, SyncError};
use umbra_ipc::{
    AllowAllAuthorizer, DeleteThingShadowRequest, GetThingShadowRequest,
    ListNamedShadowsForThingRequest, LocalEventBus, LocalShadowService, ServiceError,
    UpdateThingShadowRequest,
};
use umbra_store::{CapacityGate, DatabasePool, SqliteShadowStore};
use umbra_sync::{
    RealTimeStrategy, RequestExecutor, RequestQueue, RetryConfig, Retryer, ShadowLockRegistry,
    SyncContext, SyncHandler, TokenBucket,
};

// ----------------------------------------------------------------------
// Fake cloud
// ----------------------------------------------------------------------

#[derive(Default)]
struct FakeCloudState {
    docs: HashMap<ShadowIdentity, CloudDocument>,
    update_calls: Vec<(ShadowIdentity, Value, u64)>,
}

#[derive(Default)]
struct FakeCloud {
    state: Mutex<FakeCloudState>,
}

impl FakeCloud {
    fn update_calls(&self) -> Vec<(ShadowIdentity, Value, u64)> {
        self.state.lock().unwrap().update_calls.clone()
    }
}

#[async_trait::async_trait]
impl CloudShadowClient for FakeCloud {
    async fn get_shadow(&self, id: &ShadowIdentity) -> Result<CloudDocument, SyncError> {
        self.state
            .lock()
            .unwrap()
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    async fn update_shadow(
        &self,
        id: &ShadowIdentity,
        state: &Value,
        expected_version: u64,
    ) -> Result<u64, SyncError> {
        let mut inner = self.state.lock().unwrap();
        let current = inner.docs.get(id).map(|d| d.version).unwrap_or(0);
        if expected_version != current + 1 {
            return Err(SyncError::CloudConflict(format!(
                "expected {expected_version}, cloud at {current}"
            )));
        }
        inner
            .update_calls
            .push((id.clone(), state.clone(), expected_version));
        inner.docs.insert(
            id.clone(),
            CloudDocument {
                state: state.clone(),
                version: current + 1,
            },
        );
        Ok(current + 1)
    }

    async fn delete_shadow(&self, id: &ShadowIdentity) -> Result<(), SyncError> {
        self.state.lock().unwrap().docs.remove(id);
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

struct Harness {
    service: LocalShadowService,
    handler: Arc<SyncHandler>,
    cloud: Arc<FakeCloud>,
    gate: CapacityGate,
    bus: Arc<LocalEventBus>,
    queue: Arc<RequestQueue>,
}

async fn harness(enrolled: &[ShadowIdentity]) -> Harness {
    harness_with(enrolled, ComponentConfig::default()).await
}

async fn harness_with(enrolled: &[ShadowIdentity], config: ComponentConfig) -> Harness {
    let pool = DatabasePool::in_memory().await.unwrap();
    let store: Arc<dyn ShadowStore> = Arc::new(SqliteShadowStore::new(pool));
    store.migrate().await.unwrap();

    let cloud = Arc::new(FakeCloud::default());
    let locks = Arc::new(ShadowLockRegistry::new());
    let bus = Arc::new(LocalEventBus::new(64));
    let gate = CapacityGate::new(config.max_disk_utilization_bytes());
    let direction = config.synchronize.direction;

    let executor = RequestExecutor::new(
        store.clone(),
        cloud.clone(),
        locks.clone(),
        Arc::new(NullEventBus),
        Arc::new(TokenBucket::per_second(
            config.rate_limits.max_outbound_updates_per_second,
        )),
        direction,
        config.synchronize.provide_sync_status,
    );

    let ctx = Arc::new(SyncContext {
        executor,
        retryer: Retryer::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
        }),
        connectivity: Arc::new(SharedConnectivity::new(true)),
        enrolled: Arc::new(tokio::sync::RwLock::new(
            enrolled.iter().cloned().collect::<BTreeSet<_>>(),
        )),
        offline_poll: Duration::from_millis(5),
    });

    let queue = Arc::new(RequestQueue::new(64, direction));
    let strategy = Arc::new(RealTimeStrategy::new(queue.clone(), 2));
    let handler = Arc::new(SyncHandler::new(
        strategy,
        ctx,
        queue.clone(),
        store.clone(),
    ));

    let service = LocalShadowService::new(
        store,
        locks,
        gate.clone(),
        bus.clone(),
        handler.clone(),
        Arc::new(AllowAllAuthorizer),
        &config,
    );

    Harness {
        service,
        handler,
        cloud,
        gate,
        bus,
        queue,
    }
}

fn update_request(thing: &str, shadow: &str, body: Value) -> UpdateThingShadowRequest {
    UpdateThingShadowRequest {
        thing_name: thing.into(),
        shadow_name: shadow.into(),
        payload: serde_json::to_vec(&body).unwrap(),
    }
}

fn get_request(thing: &str, shadow: &str) -> GetThingShadowRequest {
    GetThingShadowRequest {
        thing_name: thing.into(),
        shadow_name: shadow.into(),
    }
}

fn parse(payload: &[u8]) -> Value {
    serde_json::from_slice(payload).unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

// ----------------------------------------------------------------------
// Update pipeline
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_first_update_creates_document_and_pushes_to_cloud() {
    let id = ShadowIdentity::parse("T", "S").unwrap();
    let h = harness(&[id.clone()]).await;

    let response = h
        .service
        .update_thing_shadow(
            "component-a",
            &update_request("T", "S", json!({"state": {"reported": {"color": "red"}}})),
        )
        .await
        .unwrap();

    let doc = parse(&response.payload);
    assert_eq!(doc["version"], json!(1));
    assert_eq!(doc["state"]["reported"]["color"], json!("red"));
    assert!(doc["metadata"]["reported"]["color"]["timestamp"].is_i64());

    // The accepted update is queued for the cloud; drain it.
    h.handler.start_syncing_shadows().await;
    settle().await;
    h.handler.stop_syncing_shadows().await;

    let calls = h.cloud.update_calls();
    assert!(!calls.is_empty());
    assert_eq!(calls[0].2, 1, "cloud receives the update with expected version 1");
}

#[tokio::test]
async fn test_update_publishes_accepted_delta_and_documents() {
    let id = ShadowIdentity::parse("T", "S").unwrap();
    let h = harness(&[id.clone()]).await;
    let mut rx = h.bus.subscribe();

    h.service
        .update_thing_shadow(
            "component-a",
            &update_request(
                "T",
                "S",
                json!({"state": {
                    "reported": {"color": "red"},
                    "desired": {"color": "green"}
                }, "clientToken": "tok-1"}),
            ),
        )
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            ShadowEvent::Accepted {
                operation,
                client_token,
                ..
            } => {
                assert_eq!(operation, ShadowOperation::Update);
                assert_eq!(client_token.unwrap().as_str(), "tok-1");
                kinds.push("accepted");
            }
            ShadowEvent::Delta { delta, version, .. } => {
                assert_eq!(delta, json!({"color": "green"}));
                assert_eq!(version, 1);
                kinds.push("delta");
            }
            ShadowEvent::Documents {
                previous, current, ..
            } => {
                assert!(previous.is_none());
                assert_eq!(current["version"], json!(1));
                kinds.push("documents");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(kinds, vec!["accepted", "delta", "documents"]);
}

#[tokio::test]
async fn test_version_conflict_rejected_with_event() {
    let id = ShadowIdentity::parse("T", "S").unwrap();
    let h = harness(&[id.clone()]).await;

    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"a": 1}}})),
        )
        .await
        .unwrap();
    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"a": 2}}})),
        )
        .await
        .unwrap();

    let mut rx = h.bus.subscribe();
    let err = h
        .service
        .update_thing_shadow(
            "c",
            &update_request(
                "T",
                "S",
                json!({"state": {"reported": {"a": 3}}, "version": 1}),
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    match rx.try_recv().unwrap() {
        ShadowEvent::Rejected {
            operation, error, ..
        } => {
            assert_eq!(operation, ShadowOperation::Update);
            assert!(error.contains("conflict"));
        }
        other => panic!("expected a reject event, got {other:?}"),
    }

    // No version advance happened.
    let doc = parse(
        &h.service
            .get_thing_shadow("c", &get_request("T", "S"))
            .await
            .unwrap()
            .payload,
    );
    assert_eq!(doc["version"], json!(2));
}

#[tokio::test]
async fn test_deep_nesting_rejected_without_version_advance() {
    let h = harness(&[]).await;

    let err = h
        .service
        .update_thing_shadow(
            "c",
            &update_request(
                "T",
                "S",
                json!({"state": {"desired":
                    {"1": {"2": {"3": {"4": {"5": {"6": {"7": "deep"}}}}}}}
                }}),
            ),
        )
        .await
        .unwrap_err();

    match err {
        ServiceError::InvalidArguments(msg) => {
            assert!(msg.contains("too many levels of nesting"));
        }
        other => panic!("expected InvalidArguments, got {other:?}"),
    }

    let err = h
        .service
        .get_thing_shadow("c", &get_request("T", "S"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ResourceNotFound(_)));
}

#[tokio::test]
async fn test_malformed_payload_rejected() {
    let h = harness(&[]).await;
    let err = h
        .service
        .update_thing_shadow(
            "c",
            &UpdateThingShadowRequest {
                thing_name: "T".into(),
                shadow_name: "S".into(),
                payload: b"{not json".to_vec(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArguments(_)));
}

#[tokio::test]
async fn test_invalid_thing_name_rejected() {
    let h = harness(&[]).await;
    let err = h
        .service
        .get_thing_shadow("c", &get_request("no spaces", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArguments(_)));
}

// ----------------------------------------------------------------------
// Capacity gate
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_capacity_gate_refuses_writes_and_recovers() {
    let h = harness(&[]).await;
    h.gate.set_exceeded(true);

    let err = h
        .service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"a": 1}}})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ServiceError(_)));

    // No store mutation happened.
    assert!(matches!(
        h.service
            .get_thing_shadow("c", &get_request("T", "S"))
            .await
            .unwrap_err(),
        ServiceError::ResourceNotFound(_)
    ));

    // Recovery is automatic once the gate clears.
    h.gate.set_exceeded(false);
    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"a": 1}}})),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_capacity_gate_does_not_block_reads_or_deletes() {
    let h = harness(&[]).await;

    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"a": 1}}})),
        )
        .await
        .unwrap();

    h.gate.set_exceeded(true);

    h.service
        .get_thing_shadow("c", &get_request("T", "S"))
        .await
        .unwrap();
    h.service
        .delete_thing_shadow(
            "c",
            &DeleteThingShadowRequest {
                thing_name: "T".into(),
                shadow_name: "S".into(),
            },
        )
        .await
        .unwrap();
}

// ----------------------------------------------------------------------
// Delete and get
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_delete_then_recreate_continues_version_sequence() {
    let h = harness(&[]).await;

    for n in 1..=2 {
        h.service
            .update_thing_shadow(
                "c",
                &update_request("T", "S", json!({"state": {"reported": {"n": n}}})),
            )
            .await
            .unwrap();
    }

    h.service
        .delete_thing_shadow(
            "c",
            &DeleteThingShadowRequest {
                thing_name: "T".into(),
                shadow_name: "S".into(),
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        h.service
            .get_thing_shadow("c", &get_request("T", "S"))
            .await
            .unwrap_err(),
        ServiceError::ResourceNotFound(_)
    ));

    // Deleting again is a rejection.
    assert!(matches!(
        h.service
            .delete_thing_shadow(
                "c",
                &DeleteThingShadowRequest {
                    thing_name: "T".into(),
                    shadow_name: "S".into(),
                },
            )
            .await
            .unwrap_err(),
        ServiceError::ResourceNotFound(_)
    ));

    let doc = parse(
        &h.service
            .update_thing_shadow(
                "c",
                &update_request("T", "S", json!({"state": {"reported": {"n": 9}}})),
            )
            .await
            .unwrap()
            .payload,
    );
    assert_eq!(doc["version"], json!(3), "version continues after the tombstone");
}

#[tokio::test]
async fn test_get_includes_delta() {
    let h = harness(&[]).await;

    h.service
        .update_thing_shadow(
            "c",
            &update_request(
                "T",
                "",
                json!({"state": {
                    "reported": {"power": "off"},
                    "desired": {"power": "on"}
                }}),
            ),
        )
        .await
        .unwrap();

    let doc = parse(
        &h.service
            .get_thing_shadow("c", &get_request("T", ""))
            .await
            .unwrap()
            .payload,
    );
    assert_eq!(doc["state"]["delta"], json!({"power": "on"}));
}

// ----------------------------------------------------------------------
// Listing
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_list_named_shadows_pages_through_service() {
    let h = harness(&[]).await;

    for name in ["gamma", "alpha", "beta"] {
        h.service
            .update_thing_shadow(
                "c",
                &update_request("T", name, json!({"state": {"reported": {"x": 1}}})),
            )
            .await
            .unwrap();
    }

    let first = h
        .service
        .list_named_shadows_for_thing(
            "c",
            &ListNamedShadowsForThingRequest {
                thing_name: "T".into(),
                page_size: Some(2),
                next_token: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(first.results, vec!["alpha", "beta"]);

    let second = h
        .service
        .list_named_shadows_for_thing(
            "c",
            &ListNamedShadowsForThingRequest {
                thing_name: "T".into(),
                page_size: Some(2),
                next_token: first.next_token,
            },
        )
        .await
        .unwrap();
    assert_eq!(second.results, vec!["gamma"]);
    assert_eq!(second.next_token, None);
}

#[tokio::test]
async fn test_list_rejects_bad_page_size() {
    let h = harness(&[]).await;
    for bad in [0u32, 101] {
        let err = h
            .service
            .list_named_shadows_for_thing(
                "c",
                &ListNamedShadowsForThingRequest {
                    thing_name: "T".into(),
                    page_size: Some(bad),
                    next_token: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArguments(_)));
    }
}

// ----------------------------------------------------------------------
// Rate limiting
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_per_thing_rate_limit_throttles() {
    let mut config = ComponentConfig::default();
    config.rate_limits.max_local_requests_per_second_per_thing = 1;
    let h = harness_with(&[], config).await;

    h.service
        .get_thing_shadow("c", &get_request("T", ""))
        .await
        .unwrap_err(); // ResourceNotFound, but it consumed the token

    let err = h
        .service
        .get_thing_shadow("c", &get_request("T", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Throttled(_)));

    // A different thing has its own bucket.
    let err = h
        .service
        .get_thing_shadow("c", &get_request("other", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ResourceNotFound(_)));
}

// ----------------------------------------------------------------------
// Sync integration
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_rapid_updates_coalesce_to_one_cloud_write() {
    // The strategy is not draining yet, so both updates coalesce in the
    // queue and the cloud sees a single combined write.
    let id = ShadowIdentity::parse("T", "S").unwrap();
    let h = harness(&[id.clone()]).await;

    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"x": 1}}})),
        )
        .await
        .unwrap();
    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"y": 2}}})),
        )
        .await
        .unwrap();

    assert_eq!(h.queue.len(), 1, "both local updates share one queue entry");

    h.handler.start_syncing_shadows().await;
    settle().await;
    h.handler.stop_syncing_shadows().await;

    let pushes: Vec<_> = h
        .cloud
        .update_calls()
        .into_iter()
        .filter(|(_, state, _)| state.get("reported").is_some())
        .collect();
    assert_eq!(pushes.len(), 1, "cloud observes a single write");
    assert_eq!(pushes[0].1["reported"], json!({"x": 1, "y": 2}));
}

#[tokio::test]
async fn test_built_engine_syncs_configured_shadows_end_to_end() {
    let pool = DatabasePool::in_memory().await.unwrap();
    let store: Arc<dyn ShadowStore> = Arc::new(SqliteShadowStore::new(pool));
    store.migrate().await.unwrap();
    let cloud = Arc::new(FakeCloud::default());

    let config = ComponentConfig::from_value(&serde_json::json!({
        "synchronize": {
            "shadowDocumentsMap": {"T": {"classic": false, "namedShadows": ["S"]}}
        }
    }))
    .unwrap();

    let engine = umbra_ipc::build_engine(
        &config,
        None,
        store,
        cloud.clone(),
        Arc::new(SharedConnectivity::new(true)),
        Arc::new(NullEventBus),
        None,
    )
    .unwrap();

    engine
        .service
        .update_thing_shadow(
            "component-a",
            &update_request("T", "S", json!({"state": {"reported": {"ready": true}}})),
        )
        .await
        .unwrap();

    engine.start().await;
    settle().await;
    engine.stop().await;

    let calls = cloud.update_calls();
    assert!(!calls.is_empty(), "the enrolled shadow reached the cloud");
    assert_eq!(calls[0].1["reported"], json!({"ready": true}));
}

#[tokio::test]
async fn test_unenrolled_updates_are_not_queued() {
    let h = harness(&[]).await;

    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"x": 1}}})),
        )
        .await
        .unwrap();

    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_dynamic_enrollment_on_write() {
    let id = ShadowIdentity::parse("T", "S").unwrap();
    let mut h = harness(&[]).await;
    h.service = h.service.with_dynamic_enrollment(true);

    h.service
        .update_thing_shadow(
            "c",
            &update_request("T", "S", json!({"state": {"reported": {"x": 1}}})),
        )
        .await
        .unwrap();

    assert!(h.handler.is_enrolled(&id).await);
    // Both the enrollment full-sync and the update share the queue entry.
    assert_eq!(h.queue.len(), 1);
}
