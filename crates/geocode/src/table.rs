use std::collections::{BTreeMap, HashMap};

use foundation::Coordinate;
use futures_util::future::{self, BoxFuture};

use crate::context::normalize_address;
use crate::resolver::{GeoResolver, Resolution, ResolutionFailure};

/// Offline resolver backed by a fixed address table.
///
/// Lookups use the normalized address, so `"12 Main St."` and
/// `"12 main st"` hit the same entry.
#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    entries: HashMap<String, Coordinate>,
}

impl TableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{ "<address>": { "latitude": .., "longitude": .. }, .. }`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, Coordinate> = serde_json::from_str(text)?;
        let mut table = Self::new();
        for (address, coordinate) in raw {
            table.insert(&address, coordinate);
        }
        Ok(table)
    }

    pub fn with_entry(mut self, address: &str, coordinate: Coordinate) -> Self {
        self.insert(address, coordinate);
        self
    }

    pub fn insert(&mut self, address: &str, coordinate: Coordinate) {
        self.entries.insert(normalize_address(address), coordinate);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, address: &str) -> Resolution {
        self.entries
            .get(&normalize_address(address))
            .copied()
            .ok_or(ResolutionFailure::NotFound)
    }
}

impl GeoResolver for TableResolver {
    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Resolution> {
        Box::pin(future::ready(self.lookup(address)))
    }
}

#[cfg(test)]
mod tests {
    use foundation::Coordinate;

    use super::TableResolver;
    use crate::resolver::{GeoResolver, ResolutionFailure};

    #[test]
    fn parses_json_table() {
        let t = TableResolver::from_json(
            r#"{"12 Main St.": {"latitude": 40.0, "longitude": -73.5}, "Depot": {"latitude": 1, "longitude": 2}}"#,
        )
        .unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup("12 MAIN ST"), Ok(Coordinate::new(40.0, -73.5)));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(TableResolver::from_json(r#"{"x": {"latitude": 1}}"#).is_err());
    }

    #[tokio::test]
    async fn unknown_address_is_not_found() {
        let t = TableResolver::new();
        assert_eq!(t.resolve("nowhere").await, Err(ResolutionFailure::NotFound));
    }
}
