//! # Handles
//!
//! A `Handle` is the capability a peer holds on an object stored in this
//! runtime's registry. It is opaque to the peer and minted only here.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Strong type for registry handles.
///
/// On the wire a handle is its hyphenated UUID text.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(Uuid);

impl Handle {
    /// Mints a handle that has never existed before.
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the wire form of a handle.
    pub fn parse(s: &str) -> Result<Self, InvalidHandle> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| InvalidHandle(s.to_string()))
    }

    /// The `{"$handle": ..}` marker that stands for this handle inside a wire value.
    pub fn marker(&self) -> serde_json::Value {
        bridgewire::handle_marker(self.to_string())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Handle {
    type Err = InvalidHandle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = InvalidHandle;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Handle> for String {
    fn from(h: Handle) -> Self {
        h.to_string()
    }
}

/// Text that is not the wire form of any handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidHandle(pub String);

impl fmt::Display for InvalidHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a handle", self.0)
    }
}

impl std::error::Error for InvalidHandle {}
