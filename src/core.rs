//! Core domain types and service traits for Bottin
//!
//! This module defines the record representation shared by the cache, the
//! conversion layer and the resolver, along with the `Resolver` contract
//! every resolution front-end implements.

use crate::context::ResolveContext;
use crate::dns::ResolveError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

/// The name of the root zone in normalized form.
pub const ROOT: &str = ".";

/// Separator between owner name and type mnemonic in a record key.
pub const KEY_SEPARATOR: char = '|';

/// A single resource record in its internal, textual representation.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Owner name, lower-case and fully qualified.
    pub name: String,
    /// Type mnemonic, e.g. "A" or "NS".
    #[serde(rename = "type")]
    pub rtype: String,
    /// Type-dependent payload (address literal, target name, joined text).
    pub value: String,
    /// Time-to-live, persisted in milliseconds.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ttl: Duration,
    /// Absolute instant after which the record is stale.
    pub expiry: DateTime<Utc>,
}

impl Record {
    pub fn new(
        name: &str,
        rtype: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            name: to_lower_fqdn(name),
            rtype: rtype.into(),
            value: value.into(),
            ttl,
            expiry: DateTime::<Utc>::default(),
        }
    }

    /// The cache key this record is stored under.
    pub fn key(&self) -> String {
        record_key(&self.name, &self.rtype)
    }

    /// Returns `true` while `now` is strictly before the record's expiry.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}

/// The answer, authority and additional partitions of a resolution step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Resolution {
    pub fn from_answers(answers: Vec<Record>) -> Self {
        Self {
            answers,
            ..Default::default()
        }
    }

    /// Checks if the resolution carries no records in any partition.
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty() && self.authorities.is_empty() && self.additionals.is_empty()
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Resolves a name and record type to the records published for it.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves `qname`/`qtype` under the deadline and cancellation of `ctx`.
    ///
    /// # Returns
    /// * `Ok(Resolution)`, possibly empty when no nameserver had data
    /// * `Err` for invalid input, exceeded limits, cancellation or deadline
    async fn resolve_ctx(
        &self,
        ctx: &ResolveContext,
        qname: &str,
        qtype: &str,
    ) -> Result<Resolution, ResolveError>;

    /// Resolves without a deadline or cancellation signal.
    async fn resolve_err(&self, qname: &str, qtype: &str) -> Result<Resolution, ResolveError> {
        self.resolve_ctx(&ResolveContext::background(), qname, qtype)
            .await
    }

    /// Best-effort resolution: any error yields an empty result.
    async fn resolve(&self, qname: &str, qtype: &str) -> Resolution {
        self.resolve_err(qname, qtype).await.unwrap_or_default()
    }
}

// =============================================================================
// Name helpers
// =============================================================================

/// Lower-cases `name` and ensures it ends with the root label.
pub fn to_lower_fqdn(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

/// Builds the cache key for an owner name and type mnemonic.
pub fn record_key(name: &str, rtype: &str) -> String {
    format!("{}{}{}", to_lower_fqdn(name), KEY_SEPARATOR, rtype)
}

pub fn is_root(name: &str) -> bool {
    name.is_empty() || name == ROOT
}

/// Strips the leftmost label. Returns `None` for the root.
pub fn parent(name: &str) -> Option<String> {
    if is_root(name) {
        return None;
    }
    let trimmed = name.trim_end_matches('.');
    match trimmed.split_once('.') {
        Some((_, rest)) => Some(to_lower_fqdn(rest)),
        None => Some(ROOT.to_string()),
    }
}

/// Returns `true` if `name` equals `zone` or lies beneath it.
pub fn is_subdomain(name: &str, zone: &str) -> bool {
    let name = to_lower_fqdn(name);
    let zone = to_lower_fqdn(zone);
    zone == ROOT || name == zone || name.ends_with(&format!(".{zone}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_lower_fqdn() {
        assert_eq!(to_lower_fqdn("Example.COM"), "example.com.");
        assert_eq!(to_lower_fqdn("example.com."), "example.com.");
        assert_eq!(to_lower_fqdn(""), ".");
        assert_eq!(to_lower_fqdn("."), ".");
    }

    #[test]
    fn test_parent_walks_to_root() {
        assert_eq!(parent("www.example.com."), Some("example.com.".to_string()));
        assert_eq!(parent("example.com."), Some("com.".to_string()));
        assert_eq!(parent("com."), Some(".".to_string()));
        assert_eq!(parent("COM"), Some(".".to_string()));
        assert_eq!(parent("."), None);
    }

    #[test]
    fn test_record_key_normalizes_name() {
        let record = Record::new("NS1.Example.", "A", "192.0.2.1", Duration::from_secs(60));
        assert_eq!(record.key(), "ns1.example.|A");
        assert_eq!(record_key("ns1.example", "A"), record.key());
    }

    #[test]
    fn test_is_subdomain() {
        assert!(is_subdomain("www.example.com.", "example.com."));
        assert!(is_subdomain("example.com.", "example.com."));
        assert!(is_subdomain("example.com.", "."));
        assert!(!is_subdomain("badexample.com.", "example.com."));
        assert!(!is_subdomain("com.", "example.com."));
    }
}
