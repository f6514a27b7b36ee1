//! Index construction for mirrored resources: dynamic field extraction over
//! schema-less payloads plus the built-in keys every stored object carries.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{debug, warn};

use kubemirror_core::{
    GroupVersionResource, Index, IndexConf, IndexedObject, PathEvaluator, CLUSTER_ANNOTATION,
    CLUSTER_KEY, INDEX_ANNOTATION, IS_DELETED_KEY, NAMESPACE_KEY, NAME_KEY,
};

/// Default extraction-path evaluator.
///
/// Accepts a minimal json-path-like grammar: dot-separated fields with an
/// optional single `[idx]` per segment, e.g. `spec.dnsNames[0]`. A leading
/// `.` is accepted and stripped. Missing fields and non-scalar terminals
/// render as the empty string.
pub struct DotPathEvaluator;

impl DotPathEvaluator {
    fn lookup<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>> {
        let path = path.strip_prefix('.').unwrap_or(path);
        if path.is_empty() {
            return Err(anyhow!("empty path"));
        }
        let mut cur = root;
        for seg in path.split('.') {
            if seg.is_empty() {
                return Err(anyhow!("empty segment in path `{path}`"));
            }
            let (key, idx) = split_index(seg)?;
            cur = match cur {
                Value::Object(map) => match map.get(key) {
                    Some(v) => v,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
            if let Some(i) = idx {
                cur = match cur {
                    Value::Array(arr) => match arr.get(i) {
                        Some(v) => v,
                        None => return Ok(None),
                    },
                    _ => return Ok(None),
                };
            }
        }
        Ok(Some(cur))
    }
}

fn split_index(seg: &str) -> Result<(&str, Option<usize>)> {
    match seg.find('[') {
        None => Ok((seg, None)),
        Some(open) => {
            if !seg.ends_with(']') || open + 1 >= seg.len() - 1 {
                return Err(anyhow!("malformed segment `{seg}`"));
            }
            let idx: usize = seg[open + 1..seg.len() - 1]
                .parse()
                .map_err(|_| anyhow!("malformed index in segment `{seg}`"))?;
            Ok((&seg[..open], Some(idx)))
        }
    }
}

impl PathEvaluator for DotPathEvaluator {
    fn evaluate(&self, path: &str, obj: &Value) -> Result<String> {
        Ok(match Self::lookup(obj, path)? {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        })
    }
}

/// Builds the flat string index for raw objects of the configured resource
/// types and stamps provenance back onto the payload.
pub struct Indexer {
    conf: IndexConf,
    eval: Arc<dyn PathEvaluator>,
}

impl Indexer {
    pub fn new(conf: IndexConf) -> Self {
        Self::with_evaluator(conf, Arc::new(DotPathEvaluator))
    }

    pub fn with_evaluator(conf: IndexConf, eval: Arc<dyn PathEvaluator>) -> Self {
        Self { conf, eval }
    }

    pub fn conf(&self) -> &IndexConf {
        &self.conf
    }

    /// Derive the index for `raw` under `gvr`/`cluster`, returning its
    /// namespace, name, and stored form.
    ///
    /// A failing extraction leaves that one key empty; the rest of the index
    /// and the write itself are unaffected.
    pub fn build(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        mut raw: Value,
    ) -> (String, String, IndexedObject) {
        let mut index = Index::new();
        if let Some(spec) = self.conf.get(gvr) {
            for (key, path) in spec {
                let value = match self.eval.evaluate(path, &raw) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(
                            %gvr,
                            key = key.as_str(),
                            path = path.as_str(),
                            %err,
                            "index extraction failed"
                        );
                        String::new()
                    }
                };
                index.insert(key.clone(), value);
            }
        }
        let namespace = index.get(NAMESPACE_KEY).cloned().unwrap_or_default();
        let name = index.get(NAME_KEY).cloned().unwrap_or_default();
        // Built-ins are always present, configured or not.
        index.insert(NAMESPACE_KEY.to_string(), namespace.clone());
        index.insert(NAME_KEY.to_string(), name.clone());
        index.insert(CLUSTER_KEY.to_string(), cluster.to_string());
        index.insert(
            IS_DELETED_KEY.to_string(),
            marked_for_deletion(&raw).to_string(),
        );
        stamp_provenance(&mut raw, cluster, &index);
        debug!(
            %gvr,
            namespace = namespace.as_str(),
            name = name.as_str(),
            ?index,
            "built index"
        );
        (namespace, name, IndexedObject { index, raw })
    }
}

fn marked_for_deletion(raw: &Value) -> bool {
    raw.get("metadata")
        .and_then(|m| m.get("deletionTimestamp"))
        .map(|ts| !ts.is_null())
        .unwrap_or(false)
}

/// Write the cluster id and a JSON copy of the index into the payload's own
/// annotations, merging with whatever is already there. Downstream readers of
/// the raw object recover provenance from these without a second lookup.
///
/// Kept separate from index construction so the write-back can be redirected
/// or disabled without touching the indexing itself.
fn stamp_provenance(raw: &mut Value, cluster: &str, index: &Index) {
    let Some(meta) = raw.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    let annotations = meta
        .entry("annotations")
        .or_insert_with(|| Value::Object(Default::default()));
    let Some(annotations) = annotations.as_object_mut() else {
        return;
    };
    annotations.insert(
        CLUSTER_ANNOTATION.to_string(),
        Value::String(cluster.to_string()),
    );
    let encoded = serde_json::to_string(index).unwrap_or_default();
    annotations.insert(INDEX_ANNOTATION.to_string(), Value::String(encoded));
}
