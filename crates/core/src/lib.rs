//! kubemirror core types: resource identity, indexed objects, queries, and
//! the seams the store consumes (path extraction, predicates).

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Index keys stamped on every stored object regardless of configuration.
pub const CLUSTER_KEY: &str = "cluster";
pub const NAMESPACE_KEY: &str = "namespace";
pub const NAME_KEY: &str = "name";
pub const IS_DELETED_KEY: &str = "is_deleted";

/// Annotation carrying the owning cluster id on stored payloads.
pub const CLUSTER_ANNOTATION: &str = "kubemirror.io/cluster";
/// Annotation carrying the JSON-encoded index copy on stored payloads.
pub const INDEX_ANNOTATION: &str = "kubemirror.io/index";

/// A group/version/resource triple partitioning the store.
///
/// The set of triples a store accepts is fixed by its [`IndexConf`] at
/// construction and never changes at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// Per resource type: index key name -> extraction path.
pub type IndexSpec = HashMap<String, String>;

/// Immutable store configuration: which resource types are cached, and which
/// fields of each are queryable and sortable.
pub type IndexConf = FxHashMap<GroupVersionResource, IndexSpec>;

/// Flat string index derived from a raw object. Always carries the built-in
/// `cluster`, `namespace`, `name` and `is_deleted` keys in addition to the
/// configured extractions.
pub type Index = HashMap<String, String>;

/// A raw payload together with its derived index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedObject {
    pub index: Index,
    pub raw: serde_json::Value,
}

/// Predicate bound into a query, evaluated against each object's index.
pub type Filter = Arc<dyn Fn(&Index) -> anyhow::Result<bool> + Send + Sync>;

/// One filtered, ordered, paginated scan over a resource type.
#[derive(Clone, Default)]
pub struct Query {
    /// Exact-match namespace scope; `None` scans all namespaces.
    pub namespace: Option<String>,
    pub filter: Option<Filter>,
    /// Comma-separated sort terms, each `<key>[:str|int] [ASC|DESC]`.
    /// Empty means `cluster, namespace, name` ascending.
    pub sort: String,
    /// 1-based page number; ignored while `page_size` is 0.
    pub page: u64,
    /// Page window size; 0 returns everything.
    pub page_size: u64,
}

impl Query {
    /// Evaluate the bound predicate; an absent predicate matches everything.
    pub fn matches(&self, index: &Index) -> anyhow::Result<bool> {
        match &self.filter {
            Some(filter) => filter(index),
            None => Ok(true),
        }
    }
}

#[derive(Debug, Default)]
pub struct QueryResult {
    /// Raw payloads for the requested page window.
    pub items: Vec<serde_json::Value>,
    /// Count of all predicate-matching items before pagination.
    pub total: u64,
    pub error: Option<StoreError>,
}

/// Store-level failures surfaced to callers. Nothing here is fatal to the
/// store itself.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource {0} not found")]
    GvrNotFound(GroupVersionResource),
    #[error("sort: {0}")]
    Sort(String),
    #[error("filter: {0}")]
    Filter(anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Filter(err)
    }
}

/// Extraction-path evaluator: pulls one field's rendered value out of a raw,
/// schema-less object view. A path referencing an absent field is `Ok("")`,
/// not an error; only structurally invalid paths fail.
pub trait PathEvaluator: Send + Sync {
    fn evaluate(&self, path: &str, obj: &serde_json::Value) -> anyhow::Result<String>;
}

/// The full read/write/query contract of the mirrored-resource cache.
///
/// Write entry points are called by per-cluster ingestion streams; read entry
/// points by a query-serving layer. All methods are synchronous and safe to
/// call from any number of threads.
pub trait Store: Send + Sync {
    /// True iff `gvr` is present in the store's index configuration.
    fn is_store_gvr(&self, gvr: &GroupVersionResource) -> bool;

    fn on_resource_added(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        raw: serde_json::Value,
    ) -> Result<(), StoreError>;

    fn on_resource_modified(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        raw: serde_json::Value,
    ) -> Result<(), StoreError>;

    fn on_resource_deleted(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        raw: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Drop all state for one cluster under `gvr`, leaving other clusters and
    /// resource types untouched.
    fn clean(&self, gvr: &GroupVersionResource, cluster: &str) -> Result<(), StoreError>;

    /// Point lookup; `None` when any of gvr/cluster/namespace/name is unknown.
    fn get(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Option<serde_json::Value>;

    fn query(&self, gvr: &GroupVersionResource, query: &Query) -> QueryResult;
}

pub mod prelude {
    pub use super::{
        Filter, GroupVersionResource, Index, IndexConf, IndexSpec, IndexedObject, PathEvaluator,
        Query, QueryResult, Store, StoreError,
    };
}
