//! In-RAM sharded store for mirrored cluster resources.
//!
//! Three levels of sharding — resource type → cluster → namespace — each
//! mutable level behind its own reader/writer lock, so ingest streams for
//! unrelated clusters and namespaces never serialize against each other.

#![forbid(unsafe_code)]

mod query;

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use kubemirror_core::{
    GroupVersionResource, IndexConf, IndexedObject, PathEvaluator, Query, QueryResult, Store,
    StoreError,
};
use kubemirror_index::Indexer;

/// Object-name → stored object for one (gvr, cluster, namespace).
#[derive(Default)]
struct NamespaceBucket {
    objects: RwLock<FxHashMap<String, IndexedObject>>,
}

/// Namespace → bucket for one (gvr, cluster). Buckets are created lazily and
/// survive, possibly empty, until the owning cluster is cleaned.
#[derive(Default)]
struct ClusterShard {
    namespaces: RwLock<FxHashMap<String, Arc<NamespaceBucket>>>,
}

/// The top-level store: one cluster map per configured resource type.
///
/// The gvr → cluster-map shape is fixed at construction; clusters and
/// namespaces appear lazily on first write. Lazy creation is a single
/// exclusive section on the owning map — the same lock query enumeration
/// takes shared — so structural mutation can never race a concurrent scan or
/// a competing first-write for the same key.
pub struct MemoryStore {
    resources: FxHashMap<GroupVersionResource, RwLock<FxHashMap<String, Arc<ClusterShard>>>>,
    indexer: Indexer,
}

impl MemoryStore {
    pub fn new(conf: IndexConf) -> Self {
        Self::from_indexer(Indexer::new(conf))
    }

    /// Build a store whose index extraction runs through `eval` instead of
    /// the default dot-path evaluator.
    pub fn with_evaluator(conf: IndexConf, eval: Arc<dyn PathEvaluator>) -> Self {
        Self::from_indexer(Indexer::with_evaluator(conf, eval))
    }

    fn from_indexer(indexer: Indexer) -> Self {
        let mut resources = FxHashMap::default();
        for gvr in indexer.conf().keys() {
            resources.insert(gvr.clone(), RwLock::new(FxHashMap::default()));
        }
        Self { resources, indexer }
    }

    /// Upsert path shared by add and modify: both carry identical semantics,
    /// the distinction exists only for the ingestion layer's bookkeeping.
    fn upsert(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        raw: Value,
    ) -> Result<(), StoreError> {
        let clusters = self
            .resources
            .get(gvr)
            .ok_or_else(|| StoreError::GvrNotFound(gvr.clone()))?;
        let (namespace, name, obj) = self.indexer.build(gvr, cluster, raw);
        let shard = {
            // Fast path under the shared lock; escalate only on first write
            // for this cluster.
            let existing = clusters.read().get(cluster).cloned();
            match existing {
                Some(shard) => shard,
                None => clusters
                    .write()
                    .entry(cluster.to_string())
                    .or_default()
                    .clone(),
            }
        };
        let bucket = {
            let existing = shard.namespaces.read().get(&namespace).cloned();
            match existing {
                Some(bucket) => bucket,
                None => shard
                    .namespaces
                    .write()
                    .entry(namespace.clone())
                    .or_default()
                    .clone(),
            }
        };
        let count = {
            let mut objects = bucket.objects.write();
            objects.insert(name, obj);
            objects.len()
        };
        record_object_count(gvr, cluster, &namespace, count);
        Ok(())
    }
}

impl Store for MemoryStore {
    fn is_store_gvr(&self, gvr: &GroupVersionResource) -> bool {
        self.indexer.conf().contains_key(gvr)
    }

    fn on_resource_added(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        raw: Value,
    ) -> Result<(), StoreError> {
        self.upsert(gvr, cluster, raw)
    }

    fn on_resource_modified(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        raw: Value,
    ) -> Result<(), StoreError> {
        self.upsert(gvr, cluster, raw)
    }

    fn on_resource_deleted(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        raw: Value,
    ) -> Result<(), StoreError> {
        let clusters = self
            .resources
            .get(gvr)
            .ok_or_else(|| StoreError::GvrNotFound(gvr.clone()))?;
        // The index is still derived; only namespace and name survive.
        let (namespace, name, _) = self.indexer.build(gvr, cluster, raw);
        let Some(shard) = clusters.read().get(cluster).cloned() else {
            return Ok(());
        };
        let Some(bucket) = shard.namespaces.read().get(&namespace).cloned() else {
            return Ok(());
        };
        let count = {
            let mut objects = bucket.objects.write();
            // Removing an absent name is a no-op.
            objects.remove(&name);
            objects.len()
        };
        record_object_count(gvr, cluster, &namespace, count);
        Ok(())
    }

    fn clean(&self, gvr: &GroupVersionResource, cluster: &str) -> Result<(), StoreError> {
        let clusters = self
            .resources
            .get(gvr)
            .ok_or_else(|| StoreError::GvrNotFound(gvr.clone()))?;
        clusters
            .write()
            .insert(cluster.to_string(), Arc::new(ClusterShard::default()));
        debug!(%gvr, cluster, "cleaned cluster state");
        Ok(())
    }

    fn get(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Option<Value> {
        let clusters = self.resources.get(gvr)?;
        let shard = clusters.read().get(cluster).cloned()?;
        let bucket = shard.namespaces.read().get(namespace).cloned()?;
        let raw = bucket.objects.read().get(name).map(|o| o.raw.clone());
        raw
    }

    fn query(&self, gvr: &GroupVersionResource, query: &Query) -> QueryResult {
        let mut result = QueryResult::default();
        let Some(clusters) = self.resources.get(gvr) else {
            return result;
        };
        let mut matched: Vec<IndexedObject> = Vec::new();
        {
            let clusters = clusters.read();
            for shard in clusters.values() {
                let namespaces = shard.namespaces.read();
                for (namespace, bucket) in namespaces.iter() {
                    if let Some(want) = &query.namespace {
                        if want != namespace {
                            continue;
                        }
                    }
                    let objects = bucket.objects.read();
                    for obj in objects.values() {
                        match query.matches(&obj.index) {
                            Ok(true) => matched.push(obj.clone()),
                            Ok(false) => {}
                            // Single-slot capture: the last predicate error
                            // wins; the scan keeps going.
                            Err(err) => result.error = Some(err.into()),
                        }
                    }
                }
            }
        }
        let total = matched.len() as u64;
        if total == 0 {
            return result;
        }
        if let Err(err) = query::sort_objects(&mut matched, &query.sort) {
            result.error = Some(err);
            return result;
        }
        result.total = total;
        let (start, end) = query::page_bounds(query.page, query.page_size, matched.len());
        result.items = matched[start..end].iter().map(|o| o.raw.clone()).collect();
        result
    }
}

/// Post-write object count per (cluster, gvr, namespace), for dashboards.
/// Purely informational; no exporter is wired here.
fn record_object_count(gvr: &GroupVersionResource, cluster: &str, namespace: &str, count: usize) {
    metrics::gauge!(
        "store_resources",
        count as f64,
        "cluster" => cluster.to_string(),
        "group" => gvr.group.clone(),
        "version" => gvr.version.clone(),
        "resource" => gvr.resource.clone(),
        "namespace" => namespace.to_string(),
    );
}
