use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Stable handle to one `w:t` text node inside an [`XmlPart`](crate::docx::xml::XmlPart).
///
/// Indices point into the part's event vector and stay valid for one traversal
/// pass: text edits never add or remove events, image substitutions are
/// deferred until the whole part has been visited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextNodeRef {
    pub elem_event_index: usize,
    pub text_event_index: usize,
}

/// Maps `[start, end)` of the reconstructed paragraph string onto one text node.
///
/// Offsets are UTF-8 byte offsets; `local_start..local_end` addresses the same
/// characters inside the node's own text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionEntry {
    pub start: usize,
    pub end: usize,
    pub node: TextNodeRef,
    pub local_start: usize,
    pub local_end: usize,
}

impl PositionEntry {
    pub fn intersects(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaceholderKind {
    Text { name: String },
    Image { name: String, width: u32, height: u32 },
}

impl PlaceholderKind {
    pub fn name(&self) -> &str {
        match self {
            PlaceholderKind::Text { name } | PlaceholderKind::Image { name, .. } => name,
        }
    }

    pub fn placeholder_type(&self) -> PlaceholderType {
        match self {
            PlaceholderKind::Text { .. } => PlaceholderType::Text,
            PlaceholderKind::Image { .. } => PlaceholderType::Image,
        }
    }
}

/// One placeholder occurrence inside a reconstructed paragraph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub kind: PlaceholderKind,
    pub start: usize,
    pub len: usize,
    pub raw: String,
}

impl Match {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderType {
    Text,
    Image,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderLocation {
    pub document: PathBuf,
    pub context: String,
    pub occurrences: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub name: String,
    pub kind: PlaceholderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    pub total_occurrences: usize,
    pub locations: Vec<PlaceholderLocation>,
}

/// Case-insensitive name → value mapping supplied by the caller.
///
/// For image placeholders the value is a filesystem path to the image file.
#[derive(Clone, Debug, Default)]
pub struct ReplacementMap {
    values: HashMap<String, String>,
}

impl ReplacementMap {
    /// Validates every entry up front; no entry is accepted unless all are valid.
    pub fn new<I, K, V>(entries: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values: HashMap<String, String> = HashMap::new();
        let mut problems: Vec<String> = Vec::new();
        for (k, v) in entries {
            let name: String = k.into();
            let value: String = v.into();
            let trimmed = name.trim();
            if trimmed.is_empty() {
                problems.push("empty placeholder name".to_string());
                continue;
            }
            if trimmed.contains("{{") || trimmed.contains("}}") {
                problems.push(format!("placeholder name contains delimiter syntax: {trimmed:?}"));
                continue;
            }
            let key = normalize_name(trimmed);
            match values.get(&key) {
                Some(prev) if prev != &value => {
                    problems.push(format!("conflicting values for placeholder {trimmed:?}"));
                }
                _ => {
                    values.insert(key, value);
                }
            }
        }
        if !problems.is_empty() {
            return Err(ValidationError { problems });
        }
        Ok(Self { values })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup of a placeholder name exactly as matched.
    ///
    /// Keys are stored trimmed; whether `{{ NAME }}` resolves to `NAME` is the
    /// matcher's decision (`trim_names`), not the map's.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&normalize_name(name)).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRecord {
    pub name: String,
    pub kind: PlaceholderType,
    pub value: String,
    pub context: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No entry in the replacement map.
    NoValue,
    /// Image file missing, unreadable or not attachable.
    ImageUnreadable,
    /// Dropped because an image replaced the whole paragraph.
    Superseded,
    /// Token vanished from the paragraph before it could be replaced.
    Unlocatable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedPlaceholder {
    pub name: String,
    pub kind: PlaceholderType,
    pub context: String,
    pub reason: UnresolvedReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Clean,
    CompletedWithWarnings,
    Failed,
}

/// Per-document replace-mode result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplaceReport {
    pub replacements_performed: usize,
    pub replacements: Vec<ReplacementRecord>,
    pub unresolved: Vec<UnresolvedPlaceholder>,
    pub warnings: Vec<String>,
}

impl ReplaceReport {
    pub fn status(&self) -> DocumentStatus {
        if self.warnings.is_empty() && self.unresolved.is_empty() {
            DocumentStatus::Clean
        } else {
            DocumentStatus::CompletedWithWarnings
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let map = ReplacementMap::new([("Customer_Name", "Ada"), ("logo", "/img/a.png")]).expect("valid");
        assert_eq!(map.get("CUSTOMER_NAME"), Some("Ada"));
        assert_eq!(map.get(" customer_name "), None);
        assert_eq!(map.get("missing"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn invalid_entries_are_all_reported() {
        let err = ReplacementMap::new([
            ("", "x"),
            ("{{BAD}}", "y"),
            ("ok", "1"),
            ("OK", "2"),
            ("fine", ""),
        ])
        .unwrap_err();
        assert_eq!(err.problems.len(), 3, "{:?}", err.problems);
    }

    #[test]
    fn identical_duplicates_are_accepted() {
        let map = ReplacementMap::new([("a", "1"), ("A", "1")]).expect("valid");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn report_status_reflects_warnings() {
        let mut r = ReplaceReport::default();
        assert_eq!(r.status(), DocumentStatus::Clean);
        r.unresolved.push(UnresolvedPlaceholder {
            name: "X".to_string(),
            kind: PlaceholderType::Text,
            context: "body".to_string(),
            reason: UnresolvedReason::NoValue,
        });
        assert_eq!(r.status(), DocumentStatus::CompletedWithWarnings);
    }
}
