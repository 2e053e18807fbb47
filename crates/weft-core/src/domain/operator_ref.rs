//! OperatorRef - ステージが使う operator の参照 `<name>:<semver>`
//!
//! 文字列表現と完全に往復します（`sys/fetch:1.2.3-rc.1` → parse → Display で同じ文字列）。

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::errors::WeftError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorRef {
    name: String,
    version: Version,
}

impl OperatorRef {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl FromStr for OperatorRef {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| WeftError::InvalidOperatorRef {
            input: s.to_string(),
            reason,
        };

        let mut parts = s.split(':');
        let (Some(name), Some(version), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected <name>:<version>".to_string()));
        };
        if name.is_empty() {
            return Err(invalid("empty operator name".to_string()));
        }

        let version = Version::parse(version).map_err(|e| invalid(e.to_string()))?;
        Ok(Self::new(name, version))
    }
}

impl fmt::Display for OperatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl Serialize for OperatorRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OperatorRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
