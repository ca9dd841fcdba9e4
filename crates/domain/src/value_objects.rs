use std::fmt;
use std::str::FromStr;

use fleet_core::FleetError;
use serde::{Deserialize, Serialize};

/// 语义化版本号，按 (major, minor, patch) 全序比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemanticVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// 服务端版本是否比本地版本新
    pub fn is_newer_than(&self, other: &SemanticVersion) -> bool {
        self > other
    }
}

impl FromStr for SemanticVersion {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(FleetError::InvalidVersion(s.to_string()));
        }

        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| FleetError::InvalidVersion(s.to_string()))
        };

        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl TryFrom<String> for SemanticVersion {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SemanticVersion> for String {
    fn from(version: SemanticVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: SemanticVersion = "1.0.3".parse().unwrap();
        assert_eq!(v, SemanticVersion::new(1, 0, 3));
        assert_eq!(v.to_string(), "1.0.3");
        assert_eq!("v2.1.0".parse::<SemanticVersion>().unwrap().major, 2);
    }

    #[test]
    fn test_invalid_versions() {
        assert!("1.0".parse::<SemanticVersion>().is_err());
        assert!("1.0.x".parse::<SemanticVersion>().is_err());
        assert!("".parse::<SemanticVersion>().is_err());
    }

    #[test]
    fn test_total_order() {
        let v102: SemanticVersion = "1.0.2".parse().unwrap();
        let v103: SemanticVersion = "1.0.3".parse().unwrap();
        let v110: SemanticVersion = "1.1.0".parse().unwrap();
        let v1010: SemanticVersion = "1.0.10".parse().unwrap();

        assert!(v103.is_newer_than(&v102));
        assert!(!v102.is_newer_than(&v102));
        assert!(v110 > v1010);
        // 数字比较而非字符串比较
        assert!(v1010 > v103);
    }

    #[test]
    fn test_serde_as_string() {
        let v = SemanticVersion::new(1, 2, 3);
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.2.3\"");
        let parsed: SemanticVersion = serde_json::from_str("\"1.2.3\"").unwrap();
        assert_eq!(parsed, v);
    }
}
