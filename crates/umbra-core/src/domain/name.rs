//! Validated names and the shadow identity.
//!
//! A shadow is addressed by a `(thing, shadow)` pair. The shadow name may be
//! empty, which addresses the thing's classic (unnamed) shadow. Both names
//! are case-sensitive and validated at construction time.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Maximum length of a thing name.
pub const MAX_THING_NAME_LENGTH: usize = 128;

/// Maximum length of a shadow name.
pub const MAX_SHADOW_NAME_LENGTH: usize = 64;

/// Maximum length of an echoed client token.
pub const MAX_CLIENT_TOKEN_LENGTH: usize = 64;

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-')
}

/// The name of a device ("thing").
///
/// Non-empty, at most 128 characters, restricted to `[A-Za-z0-9:_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThingName(String);

impl ThingName {
    /// Validates and wraps a thing name.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::InvalidThingName("name is empty".into()));
        }
        if name.len() > MAX_THING_NAME_LENGTH {
            return Err(DomainError::InvalidThingName(format!(
                "name exceeds {MAX_THING_NAME_LENGTH} characters"
            )));
        }
        if let Some(c) = name.chars().find(|c| !is_valid_name_char(*c)) {
            return Err(DomainError::InvalidThingName(format!(
                "invalid character {c:?} in {name:?}"
            )));
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ThingName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The name of a shadow.
///
/// Empty addresses the classic shadow; otherwise at most 64 characters
/// restricted to `[A-Za-z0-9:_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ShadowName(String);

impl ShadowName {
    /// Validates and wraps a shadow name. An empty input yields the
    /// classic shadow name.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.len() > MAX_SHADOW_NAME_LENGTH {
            return Err(DomainError::InvalidShadowName(format!(
                "name exceeds {MAX_SHADOW_NAME_LENGTH} characters"
            )));
        }
        if let Some(c) = name.chars().find(|c| !is_valid_name_char(*c)) {
            return Err(DomainError::InvalidShadowName(format!(
                "invalid character {c:?} in {name:?}"
            )));
        }
        Ok(Self(name))
    }

    /// The classic (unnamed) shadow.
    pub fn classic() -> Self {
        Self(String::new())
    }

    /// True when this is the classic shadow name.
    pub fn is_classic(&self) -> bool {
        self.0.is_empty()
    }

    /// The name as a string slice (empty for classic).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShadowName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of one shadow: a thing plus an optional shadow name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShadowIdentity {
    /// Owning thing.
    pub thing: ThingName,
    /// Shadow name; empty for the classic shadow.
    pub shadow: ShadowName,
}

impl ShadowIdentity {
    /// Builds an identity from already-validated parts.
    pub fn new(thing: ThingName, shadow: ShadowName) -> Self {
        Self { thing, shadow }
    }

    /// Validates raw strings and builds an identity.
    pub fn parse(thing: &str, shadow: &str) -> Result<Self, DomainError> {
        Ok(Self {
            thing: ThingName::new(thing)?,
            shadow: ShadowName::new(shadow)?,
        })
    }

    /// Identity of the thing's classic shadow.
    pub fn classic(thing: ThingName) -> Self {
        Self {
            thing,
            shadow: ShadowName::classic(),
        }
    }
}

impl Display for ShadowIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.shadow.is_classic() {
            write!(f, "{}", self.thing)
        } else {
            write!(f, "{}/{}", self.thing, self.shadow)
        }
    }
}

/// An opaque token a caller attaches to a request, echoed back in
/// responses and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(String);

impl ClientToken {
    /// Validates and wraps a client token.
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.len() > MAX_CLIENT_TOKEN_LENGTH {
            return Err(DomainError::InvalidClientToken(format!(
                "token exceeds {MAX_CLIENT_TOKEN_LENGTH} characters"
            )));
        }
        Ok(Self(token))
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClientToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
