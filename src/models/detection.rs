//! Detection content model
//!
//! Only the fields the test runner needs are modelled. Everything else in a
//! detection file is ignored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A unit test attached to a detection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTest {
    pub name: String,
}

/// One detection queued for testing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub tests: Vec<UnitTest>,
    /// File the detection was loaded from
    #[serde(skip)]
    pub path: PathBuf,
}

impl Detection {
    /// Whether the detection carries anything to run
    pub fn has_tests(&self) -> bool {
        !self.tests.is_empty()
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

#[cfg(test)]
impl Detection {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            search: String::new(),
            tests: Vec::new(),
            path: path.into(),
        }
    }

    pub fn with_test(mut self, name: impl Into<String>) -> Self {
        self.tests.push(UnitTest { name: name.into() });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detection_yaml() {
        let yaml = r#"
name: Suspicious Process
id: 0b2a7b4c-1111-2222-3333-444455556666
description: Finds a suspicious process.
search: '| tstats count from datamodel=Endpoint.Processes'
type: TTP
tests:
  - name: True Positive Test
    attack_data:
      - data: https://example.com/data.log
"#;
        let detection: Detection = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(detection.name, "Suspicious Process");
        assert_eq!(detection.tests.len(), 1);
        assert!(detection.has_tests());
        assert_eq!(detection.path, PathBuf::new());
    }

    #[test]
    fn test_display() {
        let detection = Detection::new("A", "detections/a.yml");
        assert_eq!(detection.to_string(), "A (detections/a.yml)");
    }
}
