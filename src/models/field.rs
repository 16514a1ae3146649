use std::fmt;

use serde::{Deserialize, Serialize};

/// A dot-separated path naming a field on a root document.
///
/// Each segment is non-empty and made of ASCII letters, digits, `_` or `-`,
/// e.g. `objectives` or `objectives.primary`. Paths compare structurally:
/// `objectives.primary` is a descendant of `objectives`, while
/// `objectivesList` is an unrelated sibling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(String);

impl FieldPath {
    pub fn parse(s: &str) -> Result<Self, String> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("field path must not be empty".to_string());
        }
        for segment in trimmed.split('.') {
            if segment.is_empty() {
                return Err(format!("field path '{}' has an empty segment", trimmed));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(format!(
                    "field path '{}' contains invalid characters",
                    trimmed
                ));
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first segment, used to look up field classification.
    pub fn head(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    pub fn segments(&self) -> std::str::Split<'_, char> {
        self.0.split('.')
    }

    /// Number of segments: `objectives.primary` has depth 2.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// True if either path lies within the other.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        self.is_within(other) || other.is_within(self)
    }

    /// True if `self` equals `ancestor` or lies structurally beneath it.
    pub fn is_within(&self, ancestor: &FieldPath) -> bool {
        match self.0.strip_prefix(ancestor.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.0
    }
}

impl std::str::FromStr for FieldPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
