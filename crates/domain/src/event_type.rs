//! IS-07 event types.
//!
//! An event type is a dot-free, slash-separated hierarchy such as
//! `boolean`, `number`, `number/temperature`, `number/temperature/C`.
//! A subscriber may put a `*` in the final position
//! (`number/temperature/*`) to match any unit at that level, and only
//! at that level: the wildcard never matches a shorter type.

use serde::{Deserialize, Serialize};

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(s: impl Into<String>) -> Self {
        EventType(s.into())
    }

    pub fn boolean() -> Self {
        EventType("boolean".into())
    }

    pub fn string() -> Self {
        EventType("string".into())
    }

    pub fn number() -> Self {
        EventType("number".into())
    }

    /// A measurement type, e.g. `measurement("number", "temperature")`
    /// or with a unit `measurement_with_unit("number", "temperature", "C")`.
    pub fn measurement(base: &str, name: &str) -> Self {
        EventType(format!("{base}/{name}"))
    }

    pub fn measurement_with_unit(base: &str, name: &str, unit: &str) -> Self {
        EventType(format!("{base}/{name}/{unit}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a subscriber filter of this type matches `capability`.
    ///
    /// Exact component-wise equality, except that a trailing `*` in the
    /// filter accepts exactly one arbitrary component in that position.
    /// `number/temperature/*` therefore matches `number/temperature/C`
    /// but neither `number/temperature` nor `number`.
    pub fn matches(&self, capability: &EventType) -> bool {
        let mut filter = self.0.split('/');
        let mut cap = capability.0.split('/');
        loop {
            match (filter.next(), cap.next()) {
                (None, None) => return true,
                (Some(f), Some(c)) => {
                    if f != WILDCARD && f != c {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        EventType(s.to_string())
    }
}
