//! TTL-aware record cache.
//!
//! Maps a record key (`name|TYPE`) to the ordered set of records sharing it.
//! Expired members are filtered on read and removed by a periodic sweep; the
//! whole map can be dumped to JSON and restored across restarts.

use crate::core::Record;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, trace};

/// Lifetime assigned to records inserted with a zero TTL.
pub const PERMANENT_TTL: Duration = Duration::from_secs(86_400 * 365 * 100);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to decode cache state: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode cache state: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Returns `now + ttl`, saturating at the largest representable instant.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A concurrency-safe store of record sets with expiry-based invalidation.
#[derive(Debug, Default)]
pub struct TtlCache {
    items: RwLock<HashMap<String, Vec<Record>>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `key`, stamping each record's expiry.
    pub fn set(&self, key: impl Into<String>, records: Vec<Record>) {
        self.set_at(key, records, Utc::now());
    }

    /// Like [`TtlCache::set`], with an explicit insertion instant.
    pub fn set_at(&self, key: impl Into<String>, mut records: Vec<Record>, now: DateTime<Utc>) {
        for record in &mut records {
            if record.ttl.is_zero() {
                record.ttl = PERMANENT_TTL;
            }
            record.expiry = expiry_after(now, record.ttl);
        }
        self.items.write().insert(key.into(), records);
    }

    /// Returns the unexpired records stored under `key`, if any remain.
    pub fn get(&self, key: &str) -> Option<Vec<Record>> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<Record>> {
        let items = self.items.read();
        let live: Vec<Record> = items
            .get(key)?
            .iter()
            .filter(|record| record.is_live_at(now))
            .cloned()
            .collect();
        if live.is_empty() {
            trace!(key, "cache entry present but fully expired");
            None
        } else {
            Some(live)
        }
    }

    pub fn delete(&self, key: &str) {
        self.items.write().remove(key);
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Drops expired records and removes entries left empty.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, records| {
            records.retain(|record| record.is_live_at(now));
            !records.is_empty()
        });
        before - items.len()
    }

    /// Serializes every entry, keyed and sorted by record key.
    pub fn dump_json(&self) -> Result<String, CacheError> {
        let items = self.items.read();
        let sorted: BTreeMap<&String, &Vec<Record>> = items.iter().collect();
        serde_json::to_string(&sorted).map_err(CacheError::Encode)
    }

    /// Restores entries from a [`TtlCache::dump_json`] document.
    ///
    /// Entries are merged over the current state. Each record's remaining
    /// lifetime is recomputed against the restore instant; records already
    /// past their expiry are kept but expire immediately.
    pub fn load_json(&self, data: &str) -> Result<(), CacheError> {
        self.load_json_at(data, Utc::now())
    }

    pub fn load_json_at(&self, data: &str, now: DateTime<Utc>) -> Result<(), CacheError> {
        let restored: HashMap<String, Vec<Record>> =
            serde_json::from_str(data).map_err(CacheError::Decode)?;

        let mut items = self.items.write();
        for (key, mut records) in restored {
            for record in &mut records {
                match (record.expiry - now).to_std() {
                    Ok(remaining) if !remaining.is_zero() => {
                        record.ttl = remaining;
                        record.expiry = expiry_after(now, remaining);
                    }
                    _ => {
                        record.ttl = Duration::ZERO;
                        record.expiry = now;
                    }
                }
            }
            items.insert(key, records);
        }
        debug!(entries = items.len(), "cache state restored");
        Ok(())
    }

    /// Spawns the background sweep task.
    ///
    /// The task holds only a weak reference and stops when the cache is
    /// dropped or when `shutdown_rx` changes.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        info!("Cache sweeper received shutdown signal.");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(cache) = cache.upgrade() else {
                            debug!("Cache dropped, stopping sweeper.");
                            break;
                        };
                        let removed = cache.sweep();
                        metrics::gauge!("dns_cache_entries").set(cache.len() as f64);
                        if removed > 0 {
                            debug!(removed, "Swept expired cache entries.");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_record(name: &str, ip: &str, ttl_secs: u64) -> Record {
        Record::new(name, "A", ip, Duration::from_secs(ttl_secs))
    }

    #[test]
    fn test_record_visible_until_expiry() {
        let cache = TtlCache::new();
        let t0 = Utc::now();
        cache.set_at("example.|A", vec![a_record("example.", "192.0.2.1", 30)], t0);

        let just_before = t0 + TimeDelta::seconds(29);
        let at_expiry = t0 + TimeDelta::seconds(30);

        assert_eq!(cache.get_at("example.|A", just_before).map(|r| r.len()), Some(1));
        assert!(cache.get_at("example.|A", at_expiry).is_none());
    }

    #[test]
    fn test_zero_ttl_is_effectively_permanent() {
        let cache = TtlCache::new();
        let t0 = Utc::now();
        cache.set_at(".|NS", vec![Record::new(".", "NS", "a.root-servers.net.", Duration::ZERO)], t0);

        let records = cache.get_at(".|NS", t0 + TimeDelta::days(365 * 50)).unwrap();
        assert_eq!(records[0].ttl, PERMANENT_TTL);
    }

    #[test]
    fn test_get_filters_expired_members_only() {
        let cache = TtlCache::new();
        let t0 = Utc::now();
        cache.set_at(
            "example.|A",
            vec![
                a_record("example.", "192.0.2.1", 10),
                a_record("example.", "192.0.2.2", 100),
            ],
            t0,
        );

        let live = cache.get_at("example.|A", t0 + TimeDelta::seconds(50)).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].value, "192.0.2.2");
    }

    #[test]
    fn test_set_replaces_without_merging() {
        let cache = TtlCache::new();
        cache.set("example.|A", vec![a_record("example.", "192.0.2.1", 60)]);
        cache.set("example.|A", vec![a_record("example.", "192.0.2.9", 60)]);

        let records = cache.get("example.|A").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "192.0.2.9");
    }

    #[test]
    fn test_delete_removes_entry() {
        let cache = TtlCache::new();
        cache.set("example.|A", vec![a_record("example.", "192.0.2.1", 60)]);
        cache.delete("example.|A");
        assert!(cache.get("example.|A").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let cache = TtlCache::new();
        let t0 = Utc::now();
        cache.set_at("short.|A", vec![a_record("short.", "192.0.2.1", 5)], t0);
        cache.set_at("long.|A", vec![a_record("long.", "192.0.2.2", 500)], t0);

        let removed = cache.sweep_at(t0 + TimeDelta::seconds(60));

        assert_eq!(removed, 1);
        let dump = cache.dump_json().unwrap();
        assert!(!dump.contains("short."));
        assert!(dump.contains("long."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_periodically() {
        let cache = Arc::new(TtlCache::new());
        // Already expired at insertion: inserted two seconds ago with a one second TTL.
        let past = Utc::now() - TimeDelta::seconds(2);
        cache.set_at("stale.|A", vec![a_record("stale.", "192.0.2.1", 1)], past);
        assert_eq!(cache.len(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = cache.spawn_sweeper(Duration::from_secs(60), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.len(), 0, "sweeper should have removed the stale entry");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_dump_and_load_round_trip() {
        let source = TtlCache::new();
        let t0 = Utc::now();
        source.set_at(
            "example.|TXT",
            vec![Record::new("example.", "TXT", "v=spf1\t-all", Duration::from_secs(300))],
            t0,
        );
        let dump = source.dump_json().unwrap();

        let restored = TtlCache::new();
        restored.load_json_at(&dump, t0 + TimeDelta::seconds(100)).unwrap();

        let records = restored
            .get_at("example.|TXT", t0 + TimeDelta::seconds(150))
            .unwrap();
        assert_eq!(records[0].name, "example.");
        assert_eq!(records[0].rtype, "TXT");
        assert_eq!(records[0].value, "v=spf1\t-all");
        assert_eq!(records[0].ttl, Duration::from_secs(200));
        assert!(restored
            .get_at("example.|TXT", t0 + TimeDelta::seconds(300))
            .is_none());
    }

    #[test]
    fn test_load_marks_elapsed_records_expired() {
        let source = TtlCache::new();
        let t0 = Utc::now();
        source.set_at("old.|A", vec![a_record("old.", "192.0.2.1", 10)], t0);
        let dump = source.dump_json().unwrap();

        let restored = TtlCache::new();
        let restore_at = t0 + TimeDelta::seconds(20);
        restored.load_json_at(&dump, restore_at).unwrap();

        // Kept by the load itself, invisible to readers.
        assert_eq!(restored.len(), 1);
        assert!(restored.get_at("old.|A", restore_at).is_none());
    }

    #[test]
    fn test_load_invalid_json_leaves_state_untouched() {
        let cache = TtlCache::new();
        cache.set("example.|A", vec![a_record("example.", "192.0.2.1", 60)]);

        let result = cache.load_json(r#"{"example.|A": "not a list"}"#);

        assert!(matches!(result, Err(CacheError::Decode(_))));
        assert_eq!(cache.get("example.|A").unwrap()[0].value, "192.0.2.1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_get_sweep() {
        let cache = Arc::new(TtlCache::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("host{i}.example.");
                let key = format!("{name}|A");
                for _ in 0..100 {
                    cache.set(key.clone(), vec![a_record(&name, "192.0.2.1", 300)]);
                    assert!(cache.get(&key).is_some());
                    cache.sweep();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len(), 16);
    }
}
