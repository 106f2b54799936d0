use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

/// Stable location identity.
///
/// The same id joins a `LocationRecord`, its `AnnotationPoint` and the live
/// surface annotation, and must not change for the whole session.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    pub fn new(id: impl Into<String>) -> Self {
        AnnotationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only ids never reach a surface.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Borrow<str> for AnnotationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AnnotationId {
    fn from(value: &str) -> Self {
        AnnotationId::new(value)
    }
}

impl From<String> for AnnotationId {
    fn from(value: String) -> Self {
        AnnotationId(value)
    }
}

impl std::fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
