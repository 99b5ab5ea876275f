//! Component configuration.
//!
//! Configuration reaches the component as a key/value map from the host
//! runtime (JSON) or, for development, from a YAML file. Unknown keys are
//! ignored; invalid values fail with [`ConfigError::InvalidConfiguration`].
//!
//! The enrolled shadow set accepts two spellings: the legacy
//! `shadowDocuments` list and the preferred `shadowDocumentsMap` map. When
//! both are present the map wins and a warning is logged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::document::{ABSOLUTE_MAX_DOCUMENT_SIZE, DEFAULT_MAX_DOCUMENT_SIZE};
use crate::domain::{ShadowIdentity, ShadowName, SyncDirection, ThingName};

/// Configuration parsing or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A recognized option carries an invalid value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Top-level component configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComponentConfig {
    /// Which shadows to synchronize and in which direction.
    pub synchronize: SynchronizeConfig,
    /// How the sync queue is drained.
    pub strategy: StrategyConfig,
    /// Outbound and local request rate ceilings.
    pub rate_limits: RateLimitsConfig,
    /// Maximum serialized document size in bytes.
    pub shadow_document_size_limit_bytes: usize,
    /// Disk ceiling for the shadow store directory, in megabytes.
    pub max_disk_utilization_mega_bytes: u64,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            synchronize: SynchronizeConfig::default(),
            strategy: StrategyConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            shadow_document_size_limit_bytes: DEFAULT_MAX_DOCUMENT_SIZE,
            max_disk_utilization_mega_bytes: 16,
        }
    }
}

/// Shadow enrollment and direction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynchronizeConfig {
    /// Legacy list form of the enrolled shadow set.
    pub shadow_documents: Vec<ThingShadowsEntry>,
    /// Preferred map form of the enrolled shadow set, keyed by thing name.
    pub shadow_documents_map: BTreeMap<String, ShadowSet>,
    /// Shadows of the device's own thing; the thing name is supplied by
    /// the host runtime.
    pub core_thing: Option<ShadowSet>,
    /// Which sides may be written during synchronization.
    pub direction: SyncDirection,
    /// Publish per-identity sync status events on the local bus.
    pub provide_sync_status: bool,
}

/// One entry of the legacy `shadowDocuments` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThingShadowsEntry {
    /// The thing whose shadows are enrolled.
    pub thing_name: String,
    /// Enroll the classic (unnamed) shadow.
    pub classic: bool,
    /// Named shadows to enroll.
    pub named_shadows: Vec<String>,
}

impl Default for ThingShadowsEntry {
    fn default() -> Self {
        Self {
            thing_name: String::new(),
            classic: true,
            named_shadows: Vec::new(),
        }
    }
}

/// The shadows enrolled for one thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShadowSet {
    /// Enroll the classic (unnamed) shadow.
    pub classic: bool,
    /// Named shadows to enroll.
    pub named_shadows: Vec<String>,
}

impl Default for ShadowSet {
    fn default() -> Self {
        Self {
            classic: true,
            named_shadows: Vec::new(),
        }
    }
}

/// Which scheduler drains the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    /// A worker pool drains the queue continuously.
    #[default]
    RealTime,
    /// A single timer tick drains the queue every `delay` seconds.
    Periodic,
}

/// Sync strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyConfig {
    /// Scheduler variant.
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    /// Seconds between drains (periodic only).
    pub delay: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::RealTime,
            delay: 300,
        }
    }
}

/// Rate ceilings for outbound cloud updates and local requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitsConfig {
    /// Updates pushed to the cloud per second, across all shadows.
    pub max_outbound_updates_per_second: u32,
    /// Local shadow requests accepted per second, across all things.
    pub max_total_local_requests_rate: u32,
    /// Local shadow requests accepted per second for a single thing.
    pub max_local_requests_per_second_per_thing: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            max_outbound_updates_per_second: 100,
            max_total_local_requests_rate: 200,
            max_local_requests_per_second_per_thing: 20,
        }
    }
}

impl ComponentConfig {
    /// Parses configuration from the host-supplied key/value map.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let config: ComponentConfig = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ComponentConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Tries to load from `path`; falls back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Validates value ranges and enrolled names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.rate_limits;
        if limits.max_outbound_updates_per_second == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "maxOutboundUpdatesPerSecond must be greater than zero".into(),
            ));
        }
        if limits.max_total_local_requests_rate == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "maxTotalLocalRequestsRate must be greater than zero".into(),
            ));
        }
        if limits.max_local_requests_per_second_per_thing == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "maxLocalRequestsPerSecondPerThing must be greater than zero".into(),
            ));
        }
        if self.shadow_document_size_limit_bytes == 0
            || self.shadow_document_size_limit_bytes > ABSOLUTE_MAX_DOCUMENT_SIZE
        {
            return Err(ConfigError::InvalidConfiguration(format!(
                "shadowDocumentSizeLimitBytes must be in (0, {ABSOLUTE_MAX_DOCUMENT_SIZE}]"
            )));
        }
        if self.max_disk_utilization_mega_bytes == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "maxDiskUtilizationMegaBytes must be greater than zero".into(),
            ));
        }
        if self.strategy.kind == StrategyKind::Periodic && self.strategy.delay == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "strategy.delay must be greater than zero for the periodic strategy".into(),
            ));
        }
        // Surface bad names at configuration time rather than on first use.
        self.synchronize.enrolled_identities(None)?;
        Ok(())
    }

    /// Disk ceiling in bytes.
    pub fn max_disk_utilization_bytes(&self) -> u64 {
        self.max_disk_utilization_mega_bytes * 1024 * 1024
    }
}

impl SynchronizeConfig {
    /// Resolves the enrolled shadow identities.
    ///
    /// `core_thing_name` is the device's own thing name as supplied by the
    /// host runtime; it anchors the `coreThing` section when present.
    pub fn enrolled_identities(
        &self,
        core_thing_name: Option<&ThingName>,
    ) -> Result<BTreeSet<ShadowIdentity>, ConfigError> {
        let mut identities = BTreeSet::new();

        let use_map = !self.shadow_documents_map.is_empty();
        if use_map && !self.shadow_documents.is_empty() {
            warn!(
                "both shadowDocuments and shadowDocumentsMap are configured; \
                 using shadowDocumentsMap"
            );
        }

        if use_map {
            for (thing_name, set) in &self.shadow_documents_map {
                collect_identities(&mut identities, thing_name, set)?;
            }
        } else {
            for entry in &self.shadow_documents {
                let set = ShadowSet {
                    classic: entry.classic,
                    named_shadows: entry.named_shadows.clone(),
                };
                collect_identities(&mut identities, &entry.thing_name, &set)?;
            }
        }

        if let (Some(thing), Some(set)) = (core_thing_name, &self.core_thing) {
            collect_identities(&mut identities, thing.as_str(), set)?;
        }

        Ok(identities)
    }
}

fn collect_identities(
    identities: &mut BTreeSet<ShadowIdentity>,
    thing_name: &str,
    set: &ShadowSet,
) -> Result<(), ConfigError> {
    let thing = ThingName::new(thing_name)
        .map_err(|e| ConfigError::InvalidConfiguration(e.to_string()))?;
    if set.classic {
        identities.insert(ShadowIdentity::classic(thing.clone()));
    }
    for name in &set.named_shadows {
        let shadow =
            ShadowName::new(name).map_err(|e| ConfigError::InvalidConfiguration(e.to_string()))?;
        identities.insert(ShadowIdentity::new(thing.clone(), shadow));
    }
    Ok(())
}
