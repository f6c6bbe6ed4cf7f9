//! Validated topic, topic filter, and client identifier types.
//!
//! Validation rules:
//! - Topic: non-empty, no leading `/`, no `#` or `+`.
//! - TopicFilter: non-empty, no leading `/`, `#` only as the final level,
//!   `+` only as a whole level.
//! - ClientId: no `#`, `+`, or `/`; the empty string is legal (the broker
//!   assigns an identifier).

use std::fmt;
use std::ops::Deref;

use crate::error::{ProtocolError, Result};

/// A publish destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(ProtocolError::InvalidTopic("empty topic".into()));
        }
        if s.starts_with('/') {
            return Err(ProtocolError::InvalidTopic(format!(
                "topic '{s}' starts with '/'"
            )));
        }
        if s.contains('#') || s.contains('+') {
            return Err(ProtocolError::InvalidTopic(format!(
                "topic '{s}' contains wildcard characters"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// A subscription pattern, permitting `+` and terminal `#` wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(ProtocolError::InvalidFilter("empty topic filter".into()));
        }
        if s.starts_with('/') {
            return Err(ProtocolError::InvalidFilter(format!(
                "filter '{s}' starts with '/'"
            )));
        }
        let levels: Vec<&str> = s.split('/').collect();
        for (i, level) in levels.iter().enumerate() {
            match *level {
                "#" => {
                    if i != levels.len() - 1 {
                        return Err(ProtocolError::InvalidFilter(format!(
                            "filter '{s}' has '#' before the final level"
                        )));
                    }
                }
                "+" => {}
                other => {
                    if other.contains('#') || other.contains('+') {
                        return Err(ProtocolError::InvalidFilter(format!(
                            "filter '{s}' mixes wildcard and text in one level"
                        )));
                    }
                }
            }
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// A client identifier. Empty means "broker-assigned".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.contains(['#', '+', '/']) {
            return Err(ProtocolError::InvalidClientId(format!(
                "client id '{s}' contains reserved characters"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

macro_rules! string_like {
    ($ty:ident) => {
        impl Deref for $ty {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = ProtocolError;

            fn try_from(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ProtocolError;

            fn try_from(s: String) -> Result<Self> {
                Self::new(s)
            }
        }
    };
}

string_like!(Topic);
string_like!(TopicFilter);
string_like!(ClientId);
