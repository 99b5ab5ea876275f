//! Pure JSON document algebra for Umbra shadow documents.
//!
//! Every function in this crate is side-effect free and operates on
//! [`serde_json::Value`] trees:
//!
//! - [`merge`]: apply an update patch to a document in place
//! - [`delta`]: compute the difference of a desired tree over a reported tree
//! - [`three_way_merge`]: reconcile local and cloud trees against a common base
//! - [`validate_depth`]: enforce the maximum object nesting depth
//!
//! The merge/delta pair is the foundation of the shadow update pipeline;
//! the three-way merge is what full synchronization runs when both sides
//! have diverged from the last synced state.

mod delta;
mod depth;
mod merge;
mod three_way;

pub use delta::delta;
pub use depth::{validate_depth, MAX_NESTING_DEPTH};
pub use merge::merge;
pub use three_way::{three_way_merge, MergeOwner};

use thiserror::Error;

/// Errors produced by the JSON document algebra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The payload shape is not mergeable (e.g. object merged into scalar).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// An object tree exceeds the maximum nesting depth.
    #[error("invalid payload: too many levels of nesting")]
    TooDeep,
}
