use foundation::{AnnotationId, LocationRecord};
use serde::Serialize;

/// Cache key under which resolution work is deduplicated.
///
/// Records whose addresses normalize to the same text share one key. When an
/// address has no alphanumeric content at all the key falls back to the
/// record id, so such records never share work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum ResolutionContext {
    Address(String),
    Record(AnnotationId),
}

impl ResolutionContext {
    /// Key for a bare address, or `None` when it normalizes to nothing.
    pub fn for_address(address: &str) -> Option<Self> {
        let normalized = normalize_address(address);
        if normalized.is_empty() {
            None
        } else {
            Some(ResolutionContext::Address(normalized))
        }
    }

    pub fn for_record(record: &LocationRecord) -> Self {
        Self::for_address(&record.address)
            .unwrap_or_else(|| ResolutionContext::Record(record.id.clone()))
    }
}

impl std::fmt::Display for ResolutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionContext::Address(a) => write!(f, "address:{a}"),
            ResolutionContext::Record(id) => write!(f, "record:{id}"),
        }
    }
}

/// Lowercases, turns punctuation into spaces and collapses whitespace.
pub fn normalize_address(address: &str) -> String {
    let mapped: String = address
        .chars()
        .flat_map(|c| {
            let c = if c.is_alphanumeric() { c } else { ' ' };
            c.to_lowercase()
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::{ResolutionContext, normalize_address};
    use foundation::LocationRecord;

    #[test]
    fn normalization_folds_case_punctuation_and_spacing() {
        assert_eq!(normalize_address("  12 Main St., Springfield "), "12 main st springfield");
        assert_eq!(normalize_address("12 MAIN ST SPRINGFIELD"), "12 main st springfield");
        assert_eq!(normalize_address("Straße\t9"), "straße 9");
    }

    #[test]
    fn variants_share_one_context() {
        let a = ResolutionContext::for_address("Rue de la Paix, 5");
        let b = ResolutionContext::for_address("rue  de la paix 5");
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn punctuation_only_address_falls_back_to_record() {
        let r = LocationRecord::new("42", "Locker", "--", None);
        assert_eq!(
            ResolutionContext::for_record(&r),
            ResolutionContext::Record("42".into())
        );
        assert_eq!(ResolutionContext::for_address("  "), None);
    }
}
