#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread;

use rustc_hash::FxHashMap;

use kubemirror_core::prelude::*;
use kubemirror_store::MemoryStore;

fn pods() -> GroupVersionResource {
    GroupVersionResource::new("", "v1", "pods")
}

fn conf() -> IndexConf {
    let mut spec = IndexSpec::new();
    spec.insert("name".into(), "metadata.name".into());
    spec.insert("namespace".into(), "metadata.namespace".into());
    let mut conf = FxHashMap::default();
    conf.insert(pods(), spec);
    conf
}

fn pod(ns: &str, name: &str) -> serde_json::Value {
    serde_json::json!({ "metadata": { "name": name, "namespace": ns } })
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

#[test]
fn disjoint_namespace_writers_do_not_interfere() {
    init_logging();
    const WRITERS: usize = 8;
    const OBJECTS: usize = 100;

    let store = Arc::new(MemoryStore::new(conf()));
    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let ns = format!("ns-{w}");
            for i in 0..OBJECTS {
                store
                    .on_resource_added(&pods(), "east", pod(&ns, &format!("obj-{i}")))
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let all = store.query(&pods(), &Query::default());
    assert_eq!(all.total, (WRITERS * OBJECTS) as u64);
    for w in 0..WRITERS {
        let res = store.query(
            &pods(),
            &Query { namespace: Some(format!("ns-{w}")), ..Default::default() },
        );
        assert_eq!(res.total, OBJECTS as u64, "namespace ns-{w} lost updates");
    }
}

#[test]
fn competing_first_writes_create_one_bucket() {
    init_logging();
    const WRITERS: usize = 16;

    // Every thread races the lazy creation of the same cluster and namespace.
    let store = Arc::new(MemoryStore::new(conf()));
    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store
                .on_resource_added(&pods(), "fresh", pod("shared", &format!("obj-{w}")))
                .unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let res = store.query(
        &pods(),
        &Query { namespace: Some("shared".into()), ..Default::default() },
    );
    assert_eq!(res.total, WRITERS as u64);
}

#[test]
fn queries_run_alongside_writes() {
    init_logging();
    const ROUNDS: usize = 200;

    let store = Arc::new(MemoryStore::new(conf()));
    store.on_resource_added(&pods(), "east", pod("ns-seed", "seed")).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..ROUNDS {
                let ns = format!("ns-{}", i % 4);
                store
                    .on_resource_added(&pods(), "east", pod(&ns, &format!("obj-{i}")))
                    .unwrap();
                if i % 3 == 0 {
                    store
                        .on_resource_deleted(&pods(), "east", pod(&ns, &format!("obj-{i}")))
                        .unwrap();
                }
            }
        })
    };
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..ROUNDS {
                let res = store.query(&pods(), &Query::default());
                assert!(res.error.is_none());
                // The seed object is never deleted, so every scan sees it.
                assert!(res.total >= 1);
                assert!(store.get(&pods(), "east", "ns-seed", "seed").is_some());
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    // Writer kept every obj-i with i % 3 != 0.
    let survivors = (0..ROUNDS).filter(|i| i % 3 != 0).count() as u64;
    let res = store.query(&pods(), &Query::default());
    assert_eq!(res.total, survivors + 1);
}
