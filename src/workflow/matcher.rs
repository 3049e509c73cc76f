//! String-or-regex matchers used by workflow conditions.
//!
//! A matcher deserialises from either a plain JSON string (exact match) or
//! an object of the form `{"$regex": "<pattern>"}`. Patterns are compiled
//! once, at workflow initialisation; a bad pattern surfaces as a
//! deserialisation error and therefore as a validation failure before any
//! page work starts.

use regex::Regex;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Exact-string or regular-expression matcher.
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    /// Test a candidate string against this matcher.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == candidate,
            Self::Pattern(re) => re.is_match(candidate),
        }
    }

    /// The source text: the literal string or the regex pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) => s.as_str(),
            Self::Pattern(re) => re.as_str(),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MatcherRepr {
    Plain(String),
    Regex {
        #[serde(rename = "$regex")]
        pattern: String,
    },
}

impl<'de> Deserialize<'de> for Matcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match MatcherRepr::deserialize(deserializer)? {
            MatcherRepr::Plain(s) => Ok(Self::Exact(s)),
            MatcherRepr::Regex { pattern } => {
                let re = Regex::new(&pattern)
                    .map_err(|e| D::Error::custom(format!("invalid $regex {pattern:?}: {e}")))?;
                Ok(Self::Pattern(re))
            }
        }
    }
}

impl Serialize for Matcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Exact(s) => serializer.serialize_str(s),
            Self::Pattern(re) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$regex", re.as_str())?;
                map.end()
            }
        }
    }
}
