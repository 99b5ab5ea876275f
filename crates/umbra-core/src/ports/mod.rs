//! Port traits implemented by the adapter crates.
//!
//! Following the driven-port pattern: the sync engine and the local request
//! surface depend only on these traits, never on concrete adapters.

pub mod capacity;
pub mod cloud_client;
pub mod connectivity;
pub mod event_bus;
pub mod shadow_store;

pub use capacity::DiskUsageSource;
pub use cloud_client::{CloudDocument, CloudShadowClient, CloudShadowEvent};
pub use connectivity::{ConnectivityProbe, SharedConnectivity};
pub use event_bus::{NullEventBus, ShadowEvent, ShadowEventBus, ShadowOperation};
pub use shadow_store::{NamedShadowPage, ShadowStore};
