//! Sort-spec parsing, multi-key ordering, and pagination for store queries.

use std::cmp::Ordering;

use smallvec::SmallVec;

use kubemirror_core::{Index, IndexedObject, StoreError};

const KEY_TYPE_STR: &str = "str";
const KEY_TYPE_INT: &str = "int";
const SORT_ASC: &str = "ASC";
const SORT_DESC: &str = "DESC";
const KEY_TYPE_SEP: char = ':';

/// Guarantees deterministic pagination when the caller does not ask for a
/// particular order.
const DEFAULT_SORT: &str = "cluster, namespace, name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Str,
    Int,
}

#[derive(Debug)]
struct SortTerm {
    key: String,
    typ: KeyType,
    reverse: bool,
}

/// Parse a comma-separated sort spec against the key set of `sample`, the
/// first candidate object's index. Sort keys must exist in the index schema
/// actually produced for this resource type.
fn parse_sort_spec(spec: &str, sample: &Index) -> Result<SmallVec<[SortTerm; 4]>, StoreError> {
    let spec = if spec.is_empty() { DEFAULT_SORT } else { spec };
    let mut terms = SmallVec::new();
    for raw_term in spec.split(',') {
        let mut term = raw_term.trim();
        if term.is_empty() {
            continue;
        }
        let mut reverse = false;
        if term.contains(' ') {
            let parts: Vec<&str> = term.split(' ').collect();
            if parts.len() > 2 {
                // Tolerated malformation: the term is dropped, the rest of
                // the spec still applies.
                continue;
            }
            match parts[1] {
                SORT_DESC => reverse = true,
                SORT_ASC => reverse = false,
                other => {
                    return Err(StoreError::Sort(format!("error sort format `{other}`")));
                }
            }
            term = parts[0];
        }
        let mut typ = KeyType::Str;
        let mut key = term;
        if term.contains(KEY_TYPE_SEP) {
            let parts: Vec<&str> = term.split(KEY_TYPE_SEP).collect();
            if parts.len() != 2 {
                return Err(StoreError::Sort("error type format".to_string()));
            }
            typ = match parts[1] {
                KEY_TYPE_INT => KeyType::Int,
                KEY_TYPE_STR => KeyType::Str,
                other => return Err(StoreError::Sort(format!("unsupported typ: {other}"))),
            };
            key = parts[0];
        }
        if !sample.contains_key(key) {
            return Err(StoreError::Sort(format!("unexpected sort key: {key}")));
        }
        terms.push(SortTerm { key: key.to_string(), typ, reverse });
    }
    Ok(terms)
}

/// Compare two objects term by term; equal values fall through to the next
/// term, a fully equal pair is `Equal`. A numeric parse failure records the
/// error and degrades the pair to `Equal` so the comparator stays total.
fn compare(
    a: &IndexedObject,
    b: &IndexedObject,
    terms: &[SortTerm],
    err: &mut Option<StoreError>,
) -> Ordering {
    for term in terms {
        let va = a.index.get(&term.key).map(String::as_str).unwrap_or("");
        let vb = b.index.get(&term.key).map(String::as_str).unwrap_or("");
        let ord = match term.typ {
            KeyType::Int => match (va.parse::<f64>(), vb.parse::<f64>()) {
                (Ok(na), Ok(nb)) => na.partial_cmp(&nb).unwrap_or(Ordering::Equal),
                _ => {
                    *err = Some(StoreError::Sort(format!(
                        "value of `{}` can not convert to number",
                        term.key
                    )));
                    return Ordering::Equal;
                }
            },
            KeyType::Str => va.cmp(vb),
        };
        if ord != Ordering::Equal {
            return if term.reverse { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

/// Order `objs` in place per `spec`. On error the slice is left in an
/// unspecified but valid order and the caller must treat it as unusable.
pub(crate) fn sort_objects(objs: &mut [IndexedObject], spec: &str) -> Result<(), StoreError> {
    if objs.is_empty() {
        return Ok(());
    }
    let terms = parse_sort_spec(spec, &objs[0].index)?;
    let mut err = None;
    objs.sort_by(|a, b| compare(a, b, &terms, &mut err));
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Clamp the page window to `[0, total]`. A window starting at or beyond
/// `total` is empty, never an error; `page_size` 0 means everything.
pub(crate) fn page_bounds(page: u64, page_size: u64, total: usize) -> (usize, usize) {
    if page_size == 0 {
        return (0, total);
    }
    let start = page.saturating_sub(1).saturating_mul(page_size);
    let end = start.saturating_add(page_size);
    ((start as usize).min(total), (end as usize).min(total))
}
