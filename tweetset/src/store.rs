//! The backing document store's narrow contract, plus an in-memory
//! reference implementation.
//!
//! The networked collection never talks to a driver directly; it consumes
//! this trait: resolve a dataset's ordered physical partitions from its
//! metadata record, open a filtered/sorted/limited cursor against one
//! partition, count matching documents in one partition. Constraint trees
//! handed over the boundary use the store's query vocabulary verbatim
//! (`$regex`/`$options`, `$gt`, `$lt`, `$in`, `$exists`, direct equality).
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::anyhow;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::collection::SortDirection;
use crate::error::{Result, TweetsetError};
use crate::filter::compare_values;
use crate::record::Record;

/// Capabilities the networked backend requires from a document store.
pub trait DocumentStore: Clone {
    /// A cursor over one partition's matching records. Dropping the cursor
    /// releases its resources, whether or not it was drained.
    type Cursor: Iterator<Item = Result<Record>>;

    /// Reads the dataset's metadata record: the ordered list of physical
    /// partition names. An unknown dataset is a fatal configuration error.
    fn partitions(&self, dataset: &str) -> Result<Vec<String>>;

    /// Opens a cursor over one partition under the given constraint tree,
    /// with optional server-side sort and partition-local limit.
    fn open_cursor(
        &self,
        partition: &str,
        query: &Value,
        sort: Option<(&str, SortDirection)>,
        limit: Option<u64>,
    ) -> Result<Self::Cursor>;

    /// Counts one partition's matching documents, respecting a
    /// partition-local limit.
    fn count(&self, partition: &str, query: &Value, limit: Option<u64>) -> Result<u64>;
}

#[derive(Debug, Default)]
struct Inner {
    datasets: BTreeMap<String, Vec<String>>,
    partitions: BTreeMap<String, Vec<Record>>,
    open_cursors: usize,
    cursors_opened: usize,
}

/// In-memory reference implementation of [`DocumentStore`].
///
/// Interprets the merged constraint tree against stored records, supports
/// server-side sort and limit, and tracks its open-cursor count so tests
/// can observe that early-terminated iteration still releases cursors.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Rc<RefCell<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dataset's metadata record: its partitions, in creation
    /// order.
    pub fn create_dataset(&self, dataset: &str, partitions: &[&str]) {
        let mut inner = self.inner.borrow_mut();
        inner.datasets.insert(
            dataset.to_string(),
            partitions.iter().map(|p| p.to_string()).collect(),
        );
        for partition in partitions {
            inner.partitions.entry(partition.to_string()).or_default();
        }
    }

    pub fn insert(&self, partition: &str, record: Record) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.partitions.get_mut(partition) {
            Some(records) => {
                records.push(record);
                Ok(())
            }
            None => Err(TweetsetError::Config(format!(
                "unknown partition '{partition}'"
            ))),
        }
    }

    /// How many cursors are currently open against this store.
    pub fn open_cursor_count(&self) -> usize {
        self.inner.borrow().open_cursors
    }

    /// How many cursors have ever been opened. Lets tests verify that an
    /// early-terminated consumer never touched later partitions.
    pub fn cursors_opened(&self) -> usize {
        self.inner.borrow().cursors_opened
    }
}

impl DocumentStore for MemStore {
    type Cursor = MemCursor;

    fn partitions(&self, dataset: &str) -> Result<Vec<String>> {
        self.inner
            .borrow()
            .datasets
            .get(dataset)
            .cloned()
            .ok_or_else(|| {
                TweetsetError::Config(format!("no metadata record for dataset '{dataset}'"))
            })
    }

    fn open_cursor(
        &self,
        partition: &str,
        query: &Value,
        sort: Option<(&str, SortDirection)>,
        limit: Option<u64>,
    ) -> Result<Self::Cursor> {
        debug!(partition, ?limit, "opening cursor");
        let mut matching = self.select(partition, query)?;
        if let Some((field, direction)) = sort {
            matching.sort_by(|a, b| {
                let ordering = match (a.resolve(field), b.resolve(field)) {
                    (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = limit {
            matching.truncate(limit as usize);
        }
        {
            let mut inner = self.inner.borrow_mut();
            inner.open_cursors += 1;
            inner.cursors_opened += 1;
        }
        Ok(MemCursor {
            records: matching.into_iter(),
            inner: Rc::clone(&self.inner),
        })
    }

    fn count(&self, partition: &str, query: &Value, limit: Option<u64>) -> Result<u64> {
        let matched = self.select(partition, query)?.len() as u64;
        Ok(match limit {
            Some(limit) => matched.min(limit),
            None => matched,
        })
    }
}

impl MemStore {
    fn select(&self, partition: &str, query: &Value) -> Result<Vec<Record>> {
        let matcher = QueryMatcher::new(query)?;
        let inner = self.inner.borrow();
        let records = inner.partitions.get(partition).ok_or_else(|| {
            TweetsetError::Config(format!("unknown partition '{partition}'"))
        })?;
        Ok(records
            .iter()
            .filter(|record| matcher.matches(record))
            .cloned()
            .collect())
    }
}

/// Cursor over one partition's matching records.
#[derive(Debug)]
pub struct MemCursor {
    records: std::vec::IntoIter<Record>,
    inner: Rc<RefCell<Inner>>,
}

impl Iterator for MemCursor {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next().map(Ok)
    }
}

impl Drop for MemCursor {
    fn drop(&mut self) {
        self.inner.borrow_mut().open_cursors -= 1;
    }
}

/// A constraint tree compiled for record-by-record evaluation.
struct QueryMatcher {
    constraints: Vec<(String, Constraint)>,
}

enum Constraint {
    Equals(Value),
    Ops(Vec<Op>),
}

enum Op {
    Exists(bool),
    Gt(Value),
    Lt(Value),
    In(Vec<Value>),
    Pattern(Regex),
}

impl QueryMatcher {
    fn new(query: &Value) -> Result<Self> {
        let Value::Object(fields) = query else {
            return Err(TweetsetError::Store(anyhow!(
                "constraint tree must be a document, got {query}"
            )));
        };
        let mut constraints = Vec::with_capacity(fields.len());
        for (path, constraint) in fields {
            let compiled = match constraint {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    let options = ops
                        .get("$options")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let mut compiled_ops = Vec::new();
                    for (op, operand) in ops {
                        match op.as_str() {
                            "$options" => {}
                            "$exists" => compiled_ops.push(Op::Exists(
                                operand.as_bool().ok_or_else(|| bad_operand(op, operand))?,
                            )),
                            "$gt" => compiled_ops.push(Op::Gt(operand.clone())),
                            "$lt" => compiled_ops.push(Op::Lt(operand.clone())),
                            "$in" => match operand {
                                Value::Array(items) => compiled_ops.push(Op::In(items.clone())),
                                _ => return Err(bad_operand(op, operand)),
                            },
                            "$regex" => {
                                let pattern =
                                    operand.as_str().ok_or_else(|| bad_operand(op, operand))?;
                                let pattern = if options.contains('i') {
                                    format!("(?i){pattern}")
                                } else {
                                    pattern.to_string()
                                };
                                compiled_ops.push(Op::Pattern(Regex::new(&pattern)?));
                            }
                            other => {
                                return Err(TweetsetError::Store(anyhow!(
                                    "unsupported query operator '{other}'"
                                )))
                            }
                        }
                    }
                    Constraint::Ops(compiled_ops)
                }
                other => Constraint::Equals(other.clone()),
            };
            constraints.push((path.clone(), compiled));
        }
        Ok(QueryMatcher { constraints })
    }

    fn matches(&self, record: &Record) -> bool {
        self.constraints.iter().all(|(path, constraint)| {
            let resolved = record.resolve(path);
            match constraint {
                Constraint::Equals(expected) => {
                    resolved.is_some_and(|value| equals_loose(value, expected))
                }
                Constraint::Ops(ops) => ops.iter().all(|op| op.matches(resolved)),
            }
        })
    }
}

impl Op {
    fn matches(&self, resolved: Option<&Value>) -> bool {
        match self {
            Op::Exists(want) => *want == resolved.is_some(),
            Op::Gt(bound) => resolved
                .and_then(|value| compare_values(value, bound))
                .is_some_and(|ordering| ordering == Ordering::Greater),
            Op::Lt(bound) => resolved
                .and_then(|value| compare_values(value, bound))
                .is_some_and(|ordering| ordering == Ordering::Less),
            Op::In(items) => {
                resolved.is_some_and(|value| items.iter().any(|item| equals_loose(value, item)))
            }
            Op::Pattern(regex) => resolved
                .and_then(Value::as_str)
                .is_some_and(|text| regex.is_match(text)),
        }
    }
}

fn equals_loose(left: &Value, right: &Value) -> bool {
    compare_values(left, right).map_or(left == right, |ordering| ordering == Ordering::Equal)
}

fn bad_operand(op: &str, operand: &Value) -> TweetsetError {
    TweetsetError::Store(anyhow!("bad operand for {op}: {operand}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_store() -> MemStore {
        let store = MemStore::new();
        store.create_dataset("tweets", &["tweets_1"]);
        for (id, lang, text) in [
            (1, "en", "penguins on ice"),
            (2, "fr", "manchots sur la glace"),
            (3, "en", "just weather"),
        ] {
            store
                .insert(
                    "tweets_1",
                    Record::new(json!({
                        "id": id,
                        "lang": lang,
                        "text": text,
                        "timestamp": format!("2015-03-01T10:0{id}:00Z"),
                    })),
                )
                .unwrap();
        }
        store
    }

    fn drain(store: &MemStore, query: Value) -> Vec<i64> {
        store
            .open_cursor("tweets_1", &query, None, None)
            .unwrap()
            .map(|r| r.unwrap().id().unwrap())
            .collect()
    }

    #[test]
    fn unknown_dataset_is_a_config_error() {
        let store = MemStore::new();
        assert!(matches!(
            store.partitions("nope"),
            Err(TweetsetError::Config(_))
        ));
    }

    #[test]
    fn regex_constraint_honors_options() {
        let store = seeded_store();
        let ids = drain(&store, json!({"text": {"$regex": "PENGUINS", "$options": "i"}}));
        assert_eq!(ids, vec![1]);
        let ids = drain(&store, json!({"text": {"$regex": "PENGUINS"}}));
        assert!(ids.is_empty());
    }

    #[test]
    fn bound_and_membership_constraints() {
        let store = seeded_store();
        let ids = drain(&store, json!({"timestamp": {"$gt": "2015-03-01T10:01:00Z"}}));
        assert_eq!(ids, vec![2, 3]);
        let ids = drain(
            &store,
            json!({"timestamp": {"$gt": "2015-03-01T10:01:00Z", "$lt": "2015-03-01T10:03:00Z"}}),
        );
        assert_eq!(ids, vec![2]);
        let ids = drain(&store, json!({"lang": {"$in": ["fr", "de"]}}));
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn exists_constraint() {
        let store = seeded_store();
        store
            .insert(
                "tweets_1",
                Record::new(json!({
                    "id": 4,
                    "text": "tagged",
                    "timestamp": "2015-03-01T10:04:00Z",
                    "coordinates": {"coordinates": [0.0, 0.0]},
                })),
            )
            .unwrap();
        let ids = drain(&store, json!({"coordinates.coordinates": {"$exists": true}}));
        assert_eq!(ids, vec![4]);
        let ids = drain(&store, json!({"coordinates.coordinates": {"$exists": false}}));
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn sort_and_limit() {
        let store = seeded_store();
        let ids: Vec<i64> = store
            .open_cursor(
                "tweets_1",
                &json!({}),
                Some(("timestamp", SortDirection::Descending)),
                Some(2),
            )
            .unwrap()
            .map(|r| r.unwrap().id().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn count_respects_partition_limit() {
        let store = seeded_store();
        assert_eq!(store.count("tweets_1", &json!({}), None).unwrap(), 3);
        assert_eq!(store.count("tweets_1", &json!({}), Some(2)).unwrap(), 2);
    }

    #[test]
    fn dropping_a_cursor_releases_it() {
        let store = seeded_store();
        assert_eq!(store.open_cursor_count(), 0);
        let mut cursor = store.open_cursor("tweets_1", &json!({}), None, None).unwrap();
        assert_eq!(store.open_cursor_count(), 1);
        let _first = cursor.next();
        drop(cursor);
        assert_eq!(store.open_cursor_count(), 0);
    }

    #[test]
    fn unsupported_operator_is_a_store_error() {
        let store = seeded_store();
        let err = store
            .open_cursor("tweets_1", &json!({"id": {"$mod": 2}}), None, None)
            .unwrap_err();
        assert!(matches!(err, TweetsetError::Store(_)));
    }
}
