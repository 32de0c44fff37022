use crate::error::QueryError;
use crate::eval;
use crate::query::Pipeline;
use crate::storage::{DafReader, EntityKey};
use crate::value::QueryResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Cache entry categories, for category-selective eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCategory {
    /// Full query results keyed by canonical text.
    QueryResults,
    /// Derived axis name-to-index dictionaries.
    AxisIndices,
}

/// Scope of an [`QueryCache::empty_cache`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Only(CacheCategory),
    Except(CacheCategory),
}

type Deps = Vec<(EntityKey, Option<u64>)>;

struct QueryEntry {
    result: Arc<QueryResult>,
    deps: Deps,
}

struct IndexEntry {
    index: Arc<HashMap<String, usize>>,
    dep: (EntityKey, Option<u64>),
}

#[derive(Default)]
struct Inner {
    queries: HashMap<String, QueryEntry>,
    indices: HashMap<String, IndexEntry>,
}

/// Memoizes evaluation results and reusable axis index dictionaries,
/// keyed by canonical query text.
///
/// Hits return the same shared result (`Arc` identity), so callers can
/// detect staleness by pointer equality. Entries record the entity
/// versions observed during evaluation and are evicted when the reader
/// reports different versions; a reader that does not track versions
/// (`entity_version` returning `None`) requires explicit `empty_cache`
/// calls after mutating.
#[derive(Default)]
pub struct QueryCache {
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate through the cache: a prior identical canonical query
    /// returns the same shared result object.
    pub fn get_or_evaluate(
        &self,
        pipeline: &Pipeline,
        reader: &dyn DafReader,
    ) -> Result<Arc<QueryResult>, QueryError> {
        let text = pipeline.canonical_text();
        if let Some(hit) = self.lookup(&text, reader) {
            debug!(query = %text, "query cache hit");
            return Ok(hit);
        }
        debug!(query = %text, "query cache miss");
        let evaluation = eval::run(pipeline, reader, Some(self)).map_err(|err| match err {
            QueryError::Eval(err) => QueryError::Eval(err.with_data_name(reader.name())),
            other => other,
        })?;
        let result = Arc::new(evaluation.result);
        let mut inner = self.inner.lock();
        inner.queries.insert(
            text,
            QueryEntry {
                result: result.clone(),
                deps: evaluation.deps,
            },
        );
        Ok(result)
    }

    fn lookup(&self, text: &str, reader: &dyn DafReader) -> Option<Arc<QueryResult>> {
        let mut inner = self.inner.lock();
        let entry = inner.queries.get(text)?;
        if deps_are_current(&entry.deps, reader) {
            return Some(entry.result.clone());
        }
        debug!(query = %text, "evicting stale query cache entry");
        inner.queries.remove(text);
        None
    }

    /// The shared name-to-index dictionary of an axis, computed once and
    /// reused by every pipeline referencing the axis. `None` when the
    /// axis does not exist.
    pub(crate) fn axis_index(
        &self,
        reader: &dyn DafReader,
        axis: &str,
    ) -> Option<Arc<HashMap<String, usize>>> {
        let key = EntityKey::axis(axis);
        {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.indices.get(axis) {
                if entry.dep.1.is_none() || reader.entity_version(&key) == entry.dep.1 {
                    return Some(entry.index.clone());
                }
                debug!(axis, "evicting stale axis index");
                inner.indices.remove(axis);
            }
        }
        let entries = reader.axis_entries(axis)?;
        let index: Arc<HashMap<String, usize>> = Arc::new(
            entries
                .iter()
                .enumerate()
                .map(|(position, entry)| (entry.clone(), position))
                .collect(),
        );
        let version = reader.entity_version(&key);
        self.inner.lock().indices.insert(
            axis.to_string(),
            IndexEntry {
                index: index.clone(),
                dep: (key, version),
            },
        );
        Some(index)
    }

    /// Clear everything, one category, or everything except one
    /// category.
    pub fn empty_cache(&self, scope: ClearScope) {
        let mut inner = self.inner.lock();
        let (clear_queries, clear_indices) = match scope {
            ClearScope::All => (true, true),
            ClearScope::Only(CacheCategory::QueryResults) => (true, false),
            ClearScope::Only(CacheCategory::AxisIndices) => (false, true),
            ClearScope::Except(CacheCategory::QueryResults) => (false, true),
            ClearScope::Except(CacheCategory::AxisIndices) => (true, false),
        };
        if clear_queries {
            inner.queries.clear();
        }
        if clear_indices {
            inner.indices.clear();
        }
        debug!(?scope, "emptied query cache");
    }
}

/// A `None` recorded version means the reader does not track versions;
/// such dependencies cannot be validated and are accepted as-is.
fn deps_are_current(deps: &Deps, reader: &dyn DafReader) -> bool {
    deps.iter().all(|(key, version)| match version {
        Some(_) => reader.entity_version(key) == *version,
        None => true,
    })
}
