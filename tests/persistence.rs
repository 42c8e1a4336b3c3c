//! Cache persistence across resolver instances.

use bottin::{
    cache::TtlCache,
    core::Resolver,
    dns::{
        test_utils::{a, FakeExchanger},
        IterativeResolver,
    },
    root::RootHints,
};
use hickory_proto::rr::RecordType;
use std::sync::Arc;
use tempfile::NamedTempFile;

const HINTS: &str = "\
example.       3600 IN NS ns1.example.
ns1.example.   3600 IN A  192.0.2.1
";

fn resolver_with(cache: Arc<TtlCache>, network: Arc<FakeExchanger>) -> IterativeResolver {
    IterativeResolver::builder()
        .root_hints(RootHints::parse(HINTS).unwrap())
        .exchanger(network)
        .cache(cache)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_dumped_cache_answers_after_restart() {
    let network = Arc::new(FakeExchanger::new());
    network.add_answer(
        "192.0.2.1",
        "www.example.",
        RecordType::A,
        vec![a("www.example.", "192.0.2.80", 3600)],
    );
    let first_cache = Arc::new(TtlCache::new());
    let first = resolver_with(first_cache.clone(), network.clone());
    first.resolve("www.example.", "A").await;

    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), first_cache.dump_json().unwrap()).unwrap();

    let restored = Arc::new(TtlCache::new());
    restored
        .load_json(&std::fs::read_to_string(file.path()).unwrap())
        .unwrap();
    let offline = Arc::new(FakeExchanger::new());
    let second = resolver_with(restored, offline.clone());

    let resolution = second.resolve("www.example.", "A").await;

    assert_eq!(resolution.answers[0].value, "192.0.2.80");
    assert!(resolution.answers[0].ttl.as_secs() <= 3600);
    assert_eq!(offline.attempt_count(), 0);
}

#[tokio::test]
async fn test_dump_uses_record_keys() {
    let network = Arc::new(FakeExchanger::new());
    network.add_answer(
        "192.0.2.1",
        "www.example.",
        RecordType::A,
        vec![
            a("www.example.", "192.0.2.80", 3600),
            a("www.example.", "192.0.2.81", 3600),
        ],
    );
    let cache = Arc::new(TtlCache::new());
    resolver_with(cache.clone(), network).resolve("www.example.", "A").await;

    let dump: serde_json::Value = serde_json::from_str(&cache.dump_json().unwrap()).unwrap();
    let records = dump["www.example.|A"].as_array().unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["type"], "A");
    assert_eq!(records[0]["name"], "www.example.");
}
