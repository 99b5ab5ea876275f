//! The versioned shadow document and its update/delete operations.
//!
//! A shadow document carries a `state` tree with `desired`, `reported`, and
//! the derived `delta` branches, a `metadata` tree mirroring the state with
//! per-leaf update timestamps, a monotonically increasing `version`, and the
//! epoch-seconds `timestamp` of the last mutation.
//!
//! Updates are expressed as patches merged into the state
//! (null-as-deletion), after which the delta is recomputed and metadata
//! timestamps are stamped for every leaf the patch touched. Every
//! successful update increments the version by exactly one; the first
//! stored version is 1.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use umbra_merge::{delta, merge, validate_depth};

use super::errors::DomainError;
use super::name::ClientToken;

/// Default ceiling for a serialized document, in bytes.
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 8 * 1024;

/// Hard ceiling for a serialized document, in bytes.
pub const ABSOLUTE_MAX_DOCUMENT_SIZE: usize = 30 * 1024 * 1024;

/// The `state` subtree of a shadow document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    /// State requested by controlling applications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Value>,
    /// State last reported by the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<Value>,
    /// Derived difference of `desired` over `reported`; never stored
    /// authoritatively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
}

impl ShadowState {
    /// The `desired`/`reported` branches as one JSON object. The derived
    /// `delta` branch is excluded.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        if let Some(desired) = &self.desired {
            obj.insert("desired".into(), desired.clone());
        }
        if let Some(reported) = &self.reported {
            obj.insert("reported".into(), reported.clone());
        }
        Value::Object(obj)
    }

    /// Rebuilds the state from a `{desired?, reported?}` object, dropping
    /// branches that merged away to empty objects.
    pub fn from_value(value: &Value) -> Self {
        let pick = |key: &str| {
            value
                .get(key)
                .filter(|v| !v.is_null())
                .filter(|v| v.as_object().map_or(true, |o| !o.is_empty()))
                .cloned()
        };
        Self {
            desired: pick("desired"),
            reported: pick("reported"),
            delta: None,
        }
    }

    /// True when neither `desired` nor `reported` is present.
    pub fn is_empty(&self) -> bool {
        self.desired.is_none() && self.reported.is_none()
    }
}

/// A shadow document as stored locally and exchanged with the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument {
    /// The document state.
    #[serde(default)]
    pub state: ShadowState,
    /// Per-leaf `{timestamp}` records mirroring `state.desired` and
    /// `state.reported`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Monotonically increasing document version; 0 only before the first
    /// store.
    pub version: u64,
    /// Epoch seconds of the last modification.
    pub timestamp: i64,
    /// Token echoed back to the caller that performed the last update.
    #[serde(rename = "clientToken", default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
    /// True while no prior version exists in the store.
    #[serde(skip)]
    pub new_document: bool,
    /// True when this document is a tombstone.
    #[serde(skip)]
    pub deleted: bool,
}

impl Default for ShadowDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// An update request payload: a state patch plus the expected version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePayload {
    /// Patch object with `desired` and/or `reported` children.
    pub state: Value,
    /// Expected current version of the document; absent skips the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Token to echo in the response and events.
    #[serde(rename = "clientToken", default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
}

impl UpdatePayload {
    /// Parses an update payload from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DomainError> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::InvalidPayload(format!("malformed update document: {e}")))
    }

    /// Validates the patch shape and nesting depth.
    ///
    /// The `state` node must be an object containing only `desired` and
    /// `reported` children, each an object or an explicit null, with at
    /// least one of the two present.
    pub fn validate(&self) -> Result<(), DomainError> {
        let state = self.state.as_object().ok_or_else(|| {
            DomainError::InvalidPayload("state node must be an object".into())
        })?;
        if state.is_empty() {
            return Err(DomainError::InvalidPayload(
                "state node must contain desired or reported".into(),
            ));
        }
        for (key, value) in state {
            match key.as_str() {
                "desired" | "reported" => {
                    if !value.is_object() && !value.is_null() {
                        return Err(DomainError::InvalidPayload(format!(
                            "state {key} node must be an object or null"
                        )));
                    }
                    validate_depth(value)?;
                }
                other => {
                    return Err(DomainError::InvalidPayload(format!(
                        "state contains an invalid node {other:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The `desired` branch of the patch, if any.
    pub fn desired(&self) -> Option<&Value> {
        self.state.get("desired")
    }

    /// The `reported` branch of the patch, if any.
    pub fn reported(&self) -> Option<&Value> {
        self.state.get("reported")
    }
}

/// The result of applying an update to a shadow document.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// The new document to store.
    pub document: ShadowDocument,
    /// The recomputed `delta` branch, when non-empty.
    pub delta: Option<Value>,
    /// The metadata timestamps stamped for the leaves this update touched.
    pub metadata_patch: Value,
}

impl ShadowDocument {
    /// An empty document with no prior version.
    pub fn new() -> Self {
        Self {
            state: ShadowState::default(),
            metadata: None,
            version: 0,
            timestamp: 0,
            client_token: None,
            new_document: true,
            deleted: false,
        }
    }

    /// Builds a document from a `{desired?, reported?}` state object,
    /// recomputing the delta and stamping metadata for every leaf.
    ///
    /// Used when a cloud document is materialized locally.
    pub fn from_state(state_value: &Value, version: u64, now: i64) -> Self {
        let mut state = ShadowState::from_value(state_value);
        state.delta = compute_delta(&state);
        let metadata = Some(build_metadata_patch(&state.to_value(), now))
            .filter(|m| m.as_object().map_or(false, |o| !o.is_empty()));
        Self {
            state,
            metadata,
            version,
            timestamp: now,
            client_token: None,
            new_document: false,
            deleted: false,
        }
    }

    /// The `{desired?, reported?}` state object of this document.
    pub fn state_value(&self) -> Value {
        self.state.to_value()
    }

    /// Serializes the document with null fields omitted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self)
            .map_err(|e| DomainError::InvalidPayload(format!("unserializable document: {e}")))
    }

    /// Validates an update payload against this document.
    ///
    /// Version rules: an absent version always passes; a new document
    /// requires version 1; otherwise the update must carry the current
    /// version.
    pub fn validate_update(&self, update: &UpdatePayload) -> Result<(), DomainError> {
        update.validate()?;
        match update.version {
            None => Ok(()),
            Some(1) if self.new_document => Ok(()),
            Some(v) if self.new_document => Err(DomainError::InvalidVersion(format!(
                "version {v} on a new document; expected 1 or none"
            ))),
            Some(v) if v == self.version => Ok(()),
            Some(v) => Err(DomainError::VersionConflict {
                expected: self.version,
                actual: v,
            }),
        }
    }

    /// Applies an update, stamping metadata with the current time.
    pub fn apply_update(
        &self,
        update: &UpdatePayload,
        max_size: usize,
    ) -> Result<UpdateOutcome, DomainError> {
        self.apply_update_at(update, max_size, Utc::now().timestamp())
    }

    /// Applies an update at an explicit epoch-seconds instant.
    ///
    /// Merges the patch into the state, recomputes the delta, stamps
    /// metadata for every leaf the patch touched, prunes metadata down to
    /// the keys still present in the state, increments the version, and
    /// enforces the serialized size limit.
    pub fn apply_update_at(
        &self,
        update: &UpdatePayload,
        max_size: usize,
        now: i64,
    ) -> Result<UpdateOutcome, DomainError> {
        self.validate_update(update)?;

        let mut doc = self.clone();

        let mut state_value = doc.state.to_value();
        merge(&mut state_value, &update.state)?;
        doc.state = ShadowState::from_value(&state_value);
        doc.state.delta = compute_delta(&doc.state);

        let metadata_patch = build_metadata_patch(&update.state, now);
        let mut metadata = doc.metadata.take().unwrap_or_else(|| json!({}));
        merge(&mut metadata, &metadata_patch)?;
        prune_metadata(&mut metadata, &state_value);
        doc.metadata = Some(metadata).filter(|m| m.as_object().map_or(false, |o| !o.is_empty()));

        doc.version = self.version + 1;
        doc.timestamp = now;
        doc.client_token = update.client_token.clone();
        doc.new_document = false;
        doc.deleted = false;

        let size = doc.to_bytes()?.len();
        if size > max_size {
            return Err(DomainError::DocumentTooLarge { size, max: max_size });
        }

        Ok(UpdateOutcome {
            delta: doc.state.delta.clone(),
            metadata_patch,
            document: doc,
        })
    }

    /// Produces the tombstone for this document. The version is retained so
    /// a later re-creation continues at `version + 1`.
    pub fn apply_delete(&self) -> ShadowDocument {
        ShadowDocument {
            state: ShadowState::default(),
            metadata: None,
            version: self.version,
            timestamp: Utc::now().timestamp(),
            client_token: None,
            new_document: false,
            deleted: true,
        }
    }
}

fn compute_delta(state: &ShadowState) -> Option<Value> {
    let desired = state.desired.as_ref()?;
    let empty = json!({});
    let reported = state.reported.as_ref().unwrap_or(&empty);
    delta(reported, desired)
}

/// Mirrors a state patch, replacing every non-object leaf with a
/// `{"timestamp": now}` record. Nulls are preserved so deletions remove
/// the matching metadata entries when the patch is merged.
fn build_metadata_patch(patch: &Value, now: i64) -> Value {
    match patch {
        Value::Null => Value::Null,
        Value::Object(obj) => {
            let mut out = Map::new();
            for (key, value) in obj {
                out.insert(key.clone(), build_metadata_patch(value, now));
            }
            Value::Object(out)
        }
        _ => json!({ "timestamp": now }),
    }
}

/// Drops metadata entries whose key no longer exists in the corresponding
/// state branch.
fn prune_metadata(metadata: &mut Value, state: &Value) {
    let (Value::Object(meta_obj), Value::Object(state_obj)) = (metadata, state) else {
        return;
    };
    meta_obj.retain(|key, meta_value| match state_obj.get(key) {
        None => false,
        Some(state_value @ Value::Object(_)) => {
            prune_metadata(meta_value, state_value);
            true
        }
        Some(_) => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(payload: Value) -> UpdatePayload {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn test_first_update_creates_version_one() {
        let doc = ShadowDocument::new();
        let outcome = doc
            .apply_update_at(
                &update(json!({"state": {"reported": {"color": "red"}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                100,
            )
            .unwrap();

        let stored = outcome.document;
        assert_eq!(stored.version, 1);
        assert_eq!(stored.state.reported, Some(json!({"color": "red"})));
        assert_eq!(stored.timestamp, 100);
        assert!(!stored.new_document);
        assert_eq!(
            stored.metadata.unwrap()["reported"]["color"]["timestamp"],
            json!(100)
        );
    }

    #[test]
    fn test_version_increments_by_one_per_update() {
        let mut doc = ShadowDocument::new();
        for i in 1..=4u64 {
            let outcome = doc
                .apply_update_at(
                    &update(json!({"state": {"reported": {"n": i}}})),
                    DEFAULT_MAX_DOCUMENT_SIZE,
                    100 + i as i64,
                )
                .unwrap();
            doc = outcome.document;
            assert_eq!(doc.version, i);
        }
    }

    #[test]
    fn test_update_with_current_version_accepted() {
        let doc = ShadowDocument::new()
            .apply_update_at(
                &update(json!({"state": {"reported": {"a": 1}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap()
            .document;

        let ok = doc.apply_update_at(
            &update(json!({"state": {"reported": {"a": 2}}, "version": 1})),
            DEFAULT_MAX_DOCUMENT_SIZE,
            2,
        );
        assert!(ok.is_ok());
        assert_eq!(ok.unwrap().document.version, 2);
    }

    #[test]
    fn test_update_with_stale_version_conflicts() {
        let doc = ShadowDocument::new()
            .apply_update_at(
                &update(json!({"state": {"reported": {"a": 1}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap()
            .document;
        let doc = doc
            .apply_update_at(
                &update(json!({"state": {"reported": {"a": 2}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                2,
            )
            .unwrap()
            .document;

        let err = doc
            .apply_update_at(
                &update(json!({"state": {"reported": {"a": 3}}, "version": 1})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                3,
            )
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::VersionConflict {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_new_document_requires_version_one() {
        let doc = ShadowDocument::new();
        let err = doc
            .validate_update(&update(
                json!({"state": {"reported": {"a": 1}}, "version": 3}),
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidVersion(_)));
    }

    #[test]
    fn test_delta_recomputed_on_update() {
        let doc = ShadowDocument::new()
            .apply_update_at(
                &update(json!({"state": {
                    "reported": {"color": "red"},
                    "desired": {"color": "green"}
                }})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap()
            .document;

        assert_eq!(doc.state.delta, Some(json!({"color": "green"})));

        // Reporting the desired color clears the delta.
        let doc = doc
            .apply_update_at(
                &update(json!({"state": {"reported": {"color": "green"}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                2,
            )
            .unwrap()
            .document;
        assert_eq!(doc.state.delta, None);
    }

    #[test]
    fn test_null_removes_field_and_metadata() {
        let doc = ShadowDocument::new()
            .apply_update_at(
                &update(json!({"state": {"reported": {"a": 1, "b": 2}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap()
            .document;

        let doc = doc
            .apply_update_at(
                &update(json!({"state": {"reported": {"b": null}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                2,
            )
            .unwrap()
            .document;

        assert_eq!(doc.state.reported, Some(json!({"a": 1})));
        let metadata = doc.metadata.unwrap();
        assert!(metadata["reported"].get("b").is_none());
        assert_eq!(metadata["reported"]["a"]["timestamp"], json!(1));
    }

    #[test]
    fn test_nesting_depth_rejected() {
        let doc = ShadowDocument::new();
        let err = doc
            .apply_update_at(
                &update(json!({"state": {"desired":
                    {"1": {"2": {"3": {"4": {"5": {"6": {"7": "deep"}}}}}}}
                }})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidPayload("too many levels of nesting".into())
        );
    }

    #[test]
    fn test_state_with_unknown_node_rejected() {
        let doc = ShadowDocument::new();
        let err = doc
            .validate_update(&update(json!({"state": {"bogus": {}}})))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidPayload(_)));
    }

    #[test]
    fn test_scalar_state_branch_rejected() {
        let doc = ShadowDocument::new();
        let err = doc
            .validate_update(&update(json!({"state": {"desired": 42}})))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidPayload(_)));
    }

    #[test]
    fn test_size_limit_enforced() {
        let doc = ShadowDocument::new();
        let big = "x".repeat(9000);
        let err = doc
            .apply_update_at(
                &update(json!({"state": {"reported": {"blob": big}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::DocumentTooLarge { .. }));
    }

    #[test]
    fn test_delete_retains_version() {
        let doc = ShadowDocument::new()
            .apply_update_at(
                &update(json!({"state": {"reported": {"a": 1}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap()
            .document;

        let tombstone = doc.apply_delete();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.version, 1);
        assert!(tombstone.state.is_empty());
    }

    #[test]
    fn test_client_token_echoed() {
        let doc = ShadowDocument::new()
            .apply_update_at(
                &update(json!({
                    "state": {"reported": {"a": 1}},
                    "clientToken": "req-17"
                })),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap()
            .document;
        assert_eq!(doc.client_token.unwrap().as_str(), "req-17");
    }

    #[test]
    fn test_serialization_omits_null_fields() {
        let doc = ShadowDocument::new()
            .apply_update_at(
                &update(json!({"state": {"reported": {"a": 1}}})),
                DEFAULT_MAX_DOCUMENT_SIZE,
                1,
            )
            .unwrap()
            .document;
        let text = String::from_utf8(doc.to_bytes().unwrap()).unwrap();
        assert!(!text.contains("desired"));
        assert!(!text.contains("clientToken"));
        assert!(!text.contains("delta"));
    }
}
