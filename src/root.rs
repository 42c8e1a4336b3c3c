//! Root bootstrap.
//!
//! Parses root-zone hints (the IANA `named.root` by default) into an
//! immutable [`RootHints`] value and seeds the dedicated root cache with it.

use crate::{cache::TtlCache, convert::convert_record, core::Record};
use hickory_proto::{
    rr::{Name, Record as WireRecord},
    serialize::txt::Parser,
};
use std::{collections::BTreeMap, path::Path};
use thiserror::Error;
use tracing::{info, warn};

/// The IANA root hints shipped with the crate.
pub const EMBEDDED_ROOT_HINTS: &str = include_str!("named.root");

#[derive(Error, Debug)]
pub enum RootHintsError {
    #[error("failed to read root hints from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed root hints: {0}")]
    Parse(String),
}

/// Parsed root-zone seed data.
#[derive(Debug, Clone)]
pub struct RootHints {
    records: Vec<WireRecord>,
}

impl RootHints {
    /// Parses hints in zone-file presentation format.
    pub fn parse(text: &str) -> Result<Self, RootHintsError> {
        let parser = Parser::new(text, None, Some(Name::root()));
        let (_origin, sets) = parser
            .parse()
            .map_err(|e| RootHintsError::Parse(e.to_string()))?;

        let records = sets
            .values()
            .flat_map(|set| set.records_without_rrsigs().cloned())
            .collect();
        Ok(Self { records })
    }

    pub fn from_file(path: &Path) -> Result<Self, RootHintsError> {
        let text = std::fs::read_to_string(path).map_err(|source| RootHintsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn embedded() -> Result<Self, RootHintsError> {
        Self::parse(EMBEDDED_ROOT_HINTS)
    }

    pub fn records(&self) -> &[WireRecord] {
        &self.records
    }
}

/// Loads every convertible hint record into `cache` without TTL-driven expiry.
///
/// Records sharing a key are stored together. Returns the number of records
/// inserted.
pub fn seed_root_cache(cache: &TtlCache, hints: &RootHints) -> usize {
    let mut grouped: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for wire in hints.records() {
        match convert_record(wire, false) {
            Some(record) => grouped.entry(record.key()).or_default().push(record),
            None => warn!(record = %wire, "Skipping unconvertible root hint"),
        }
    }

    let mut count = 0;
    for (key, records) in grouped {
        count += records.len();
        cache.set(key, records);
    }
    info!(records = count, "Root cache seeded from hints.");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PERMANENT_TTL;

    #[test]
    fn test_embedded_hints_seed_all_root_servers() {
        let cache = TtlCache::new();
        let hints = RootHints::embedded().unwrap();
        let count = seed_root_cache(&cache, &hints);

        // 13 NS, 13 A and 13 AAAA records.
        assert_eq!(count, 39);
        let ns = cache.get(".|NS").unwrap();
        assert_eq!(ns.len(), 13);
        assert!(ns.iter().all(|r| r.ttl == PERMANENT_TTL));
        assert!(ns.iter().any(|r| r.value == "a.root-servers.net."));

        let a = cache.get("a.root-servers.net.|A").unwrap();
        assert_eq!(a[0].value, "198.41.0.4");
    }

    #[test]
    fn test_custom_hints() {
        let hints = RootHints::parse(
            "example.      3600 IN NS ns1.example.\n\
             ns1.example.  3600 IN A  192.0.2.1\n",
        )
        .unwrap();
        let cache = TtlCache::new();
        seed_root_cache(&cache, &hints);

        assert_eq!(cache.get("example.|NS").unwrap()[0].value, "ns1.example.");
        assert_eq!(cache.get("ns1.example.|A").unwrap()[0].value, "192.0.2.1");
        assert!(cache.get(".|NS").is_none());
    }

    #[test]
    fn test_malformed_hints_are_fatal() {
        let result = RootHints::parse(".  3600 IN NS\nthis is not a zone file ((\n");
        assert!(matches!(result, Err(RootHintsError::Parse(_))));
    }
}
