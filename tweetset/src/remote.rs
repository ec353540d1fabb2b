//! The networked-store-backed query collection.
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::collection::{SortDirection, TweetCollection};
use crate::error::{Result, TweetsetError};
use crate::filter::{merge_fragments, Filter};
use crate::record::Record;
use crate::store::DocumentStore;

/// A query collection over a logical dataset in a backing document store.
///
/// A logical dataset may be horizontally sharded into several physical
/// partitions split by time; the ordered partition list comes from the
/// dataset's metadata record, read once at construction. Iteration walks
/// partitions in that order without interleaving, one cursor at a time.
///
/// The collection is immutable: chaining operations clone the filter list
/// and share the store handle.
///
/// ```ignore
/// let collection = RemoteCollection::connect(store, "tweets")?;
/// collection.since(t0).containing(&["ebola"]).count()?;
/// ```
#[derive(Clone)]
pub struct RemoteCollection<S: DocumentStore> {
    store: S,
    dataset: String,
    partitions: Vec<String>,
    filters: Vec<Filter>,
    limit: Option<u64>,
    sort: Option<(String, SortDirection)>,
}

impl<S: DocumentStore> RemoteCollection<S> {
    /// Connects to a logical dataset, resolving its physical partitions.
    /// Fails immediately when the dataset has no metadata record.
    pub fn connect(store: S, dataset: &str) -> Result<Self> {
        let partitions = store.partitions(dataset)?;
        debug!(dataset, partitions = partitions.len(), "connected");
        Ok(RemoteCollection {
            store,
            dataset: dataset.to_string(),
            partitions,
            filters: Vec::new(),
            limit: None,
            sort: None,
        })
    }

    /// The accumulated predicate list, in insertion order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Restricts the query to the newest partition in the split-set.
    pub fn using_latest_partition_only(self) -> Self {
        let mut ret = self;
        if let Some(last) = ret.partitions.last().cloned() {
            ret.partitions = vec![last];
        }
        ret
    }

    /// The merged constraint tree for the accumulated filters. Conflicting
    /// predicates surface here, at evaluation time.
    fn merged_query(&self) -> Result<Value> {
        let fragments: Vec<Value> = self.filters.iter().map(Filter::fragment).collect();
        merge_fragments(&fragments)
    }

    /// The declared lower time bound, if any.
    pub(crate) fn since_bound(&self) -> Option<DateTime<Utc>> {
        self.filters.iter().find_map(|f| match f {
            Filter::Since(t) => Some(*t),
            _ => None,
        })
    }

    /// The declared upper time bound, if any.
    pub(crate) fn until_bound(&self) -> Option<DateTime<Utc>> {
        self.filters.iter().find_map(|f| match f {
            Filter::Until(t) => Some(*t),
            _ => None,
        })
    }

    /// Derives a sub-query whose first lower/upper bound predicates are
    /// overridden in place to the given window. Both bounds must already be
    /// declared on the collection.
    pub(crate) fn with_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let mut ret = self.clone();
        let mut replaced_since = false;
        let mut replaced_until = false;
        for filter in ret.filters.iter_mut() {
            match filter {
                Filter::Since(t) if !replaced_since => {
                    *t = start;
                    replaced_since = true;
                }
                Filter::Until(t) if !replaced_until => {
                    *t = end;
                    replaced_until = true;
                }
                _ => {}
            }
        }
        if !replaced_since {
            return Err(TweetsetError::WindowingPrecondition(String::from(
                "collection has no lower time bound to override",
            )));
        }
        if !replaced_until {
            return Err(TweetsetError::WindowingPrecondition(String::from(
                "collection has no upper time bound to override",
            )));
        }
        Ok(ret)
    }

    fn first_by_timestamp(&self, direction: SortDirection) -> Result<DateTime<Utc>> {
        let bounded = self.clone().sort("timestamp", direction)?.limit(1);
        match bounded.iter()?.next() {
            Some(record) => record?.timestamp(),
            None => Err(TweetsetError::Store(anyhow::anyhow!(
                "time_range on a collection matching no records"
            ))),
        }
    }
}

impl<S: DocumentStore> TweetCollection for RemoteCollection<S> {
    type Iter = RemoteIter<S>;

    fn with_filter(self, filter: Filter) -> Self {
        let mut ret = self;
        ret.filters.push(filter);
        ret
    }

    fn with_limit(self, count: u64) -> Self {
        let mut ret = self;
        ret.limit = Some(count);
        ret
    }

    fn with_sort(self, field: &str, direction: SortDirection) -> Result<Self> {
        let mut ret = self;
        ret.sort = Some((field.to_string(), direction));
        Ok(ret)
    }

    /// Sums matching documents across partitions, allocating any overall
    /// limit against qualifying records in partition order.
    fn count(&self) -> Result<u64> {
        let query = self.merged_query()?;
        let mut total = 0;
        let mut remaining = self.limit;
        for partition in &self.partitions {
            let matched = self.store.count(partition, &query, remaining)?;
            total += matched;
            if let Some(rem) = remaining.as_mut() {
                *rem -= matched;
                if *rem == 0 {
                    break;
                }
            }
        }
        Ok(total)
    }

    fn iter(&self) -> Result<Self::Iter> {
        let query = self.merged_query()?;
        Ok(RemoteIter {
            store: self.store.clone(),
            partitions: self.partitions.clone().into_iter(),
            query,
            sort: self.sort.clone(),
            remaining: self.limit,
            current: None,
            failed: false,
        })
    }

    /// (first, last) record timestamps, via two sorted limit-1 sub-queries.
    fn time_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.first_by_timestamp(SortDirection::Ascending)?;
        let last = self.first_by_timestamp(SortDirection::Descending)?;
        Ok((first, last))
    }
}

impl<S: DocumentStore> fmt::Debug for RemoteCollection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RemoteCollection(dataset: {}, partitions: {}, filters: {}, limit: {:?})",
            self.dataset,
            self.partitions.len(),
            self.filters.len(),
            self.limit,
        )
    }
}

/// Lazy record stream over a remote collection.
///
/// Opens one partition cursor at a time, carrying the remaining result
/// cap across partitions; a consumer that stops early never opens later
/// partitions, and dropping the iterator releases the current cursor.
pub struct RemoteIter<S: DocumentStore> {
    store: S,
    partitions: std::vec::IntoIter<String>,
    query: Value,
    sort: Option<(String, SortDirection)>,
    remaining: Option<u64>,
    current: Option<S::Cursor>,
    failed: bool,
}

impl<S: DocumentStore> Iterator for RemoteIter<S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if self.remaining == Some(0) {
                self.current = None;
                return None;
            }
            if let Some(cursor) = self.current.as_mut() {
                match cursor.next() {
                    Some(Ok(record)) => {
                        if let Some(rem) = self.remaining.as_mut() {
                            *rem -= 1;
                        }
                        return Some(Ok(record));
                    }
                    Some(Err(e)) => {
                        self.failed = true;
                        self.current = None;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
                continue;
            }
            let partition = self.partitions.next()?;
            let sort = self.sort.as_ref().map(|(field, dir)| (field.as_str(), *dir));
            match self
                .store
                .open_cursor(&partition, &self.query, sort, self.remaining)
            {
                Ok(cursor) => self.current = Some(cursor),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn tweet(id: i64, minute: u32, lang: &str, text: &str) -> Record {
        Record::new(json!({
            "id": id,
            "lang": lang,
            "text": text,
            "timestamp": format!("2015-03-01T10:{minute:02}:00Z"),
            "user": {"id": id * 100, "location": "NYC"},
            "random_number": (id as f64) / 10.0,
        }))
    }

    fn two_partition_store() -> MemStore {
        let store = MemStore::new();
        store.create_dataset("tweets", &["tweets_1", "tweets_2"]);
        // Partition 1: 3 English tweets, 1 French.
        for (id, minute) in [(1, 0), (2, 5), (3, 10)] {
            store.insert("tweets_1", tweet(id, minute, "en", "hello")).unwrap();
        }
        store.insert("tweets_1", tweet(4, 12, "fr", "bonjour")).unwrap();
        // Partition 2: 5 English tweets.
        for (id, minute) in [(5, 20), (6, 25), (7, 30), (8, 35), (9, 40)] {
            store.insert("tweets_2", tweet(id, minute, "en", "hello")).unwrap();
        }
        store
    }

    fn ids(collection: &RemoteCollection<MemStore>) -> Vec<i64> {
        collection
            .iter()
            .unwrap()
            .map(|r| r.unwrap().id().unwrap())
            .collect()
    }

    #[test]
    fn chaining_does_not_mutate_the_receiver() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let narrowed = base.clone().language(&["fr"]);
        assert_eq!(base.filters().len(), 0);
        assert_eq!(narrowed.filters().len(), 1);
        assert_eq!(base.count().unwrap(), 9);
        assert_eq!(narrowed.count().unwrap(), 1);
    }

    #[test]
    fn conjunction_is_commutative() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let t = Utc.with_ymd_and_hms(2015, 3, 1, 10, 7, 0).unwrap();
        let one = ids(&base.clone().language(&["en"]).since(t));
        let two = ids(&base.clone().since(t).language(&["en"]));
        assert_eq!(one, two);
        assert_eq!(one, vec![3, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn limit_allocates_across_partitions_by_qualifying_records() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        // 3 qualifying in partition 1, 5 in partition 2.
        let limited = base.language(&["en"]).limit(4);
        assert_eq!(ids(&limited), vec![1, 2, 3, 5]);
        assert_eq!(limited.count().unwrap(), 4);
    }

    #[test]
    fn limit_smaller_than_first_partition() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let store = two_partition_store();
        let limited = RemoteCollection::connect(store.clone(), "tweets")
            .unwrap()
            .limit(2);
        assert_eq!(ids(&limited), vec![1, 2]);
        assert_eq!(limited.count().unwrap(), 2);
        // The cap was satisfied inside partition 1; partition 2 stays cold.
        assert_eq!(store.cursors_opened(), 1);
        assert_eq!(base.limit(2).count().unwrap(), 2);
    }

    #[test]
    fn early_break_releases_the_cursor_and_skips_later_partitions() {
        let store = two_partition_store();
        let collection = RemoteCollection::connect(store.clone(), "tweets").unwrap();
        {
            let mut stream = collection.iter().unwrap();
            let first = stream.next().unwrap().unwrap();
            assert_eq!(first.id(), Some(1));
            assert_eq!(store.open_cursor_count(), 1);
        }
        assert_eq!(store.open_cursor_count(), 0);
        assert_eq!(store.cursors_opened(), 1);
    }

    #[test]
    fn sample_is_deterministic() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let once = ids(&base.clone().sample(0.35));
        let twice = ids(&base.clone().sample(0.35));
        assert_eq!(once, twice);
        assert_eq!(once, vec![1, 2, 3]);
    }

    #[test]
    fn conflicting_predicates_fail_at_evaluation_time() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        // Accumulation itself cannot fail.
        let conflicted = base.containing(&["peace"]).containing(&["war"]);
        assert!(matches!(
            conflicted.count(),
            Err(TweetsetError::ConflictingPredicate { .. })
        ));
        assert!(matches!(
            conflicted.iter(),
            Err(TweetsetError::ConflictingPredicate { .. })
        ));
    }

    #[test]
    fn repeated_since_keeps_the_tighter_bound() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let loose = Utc.with_ymd_and_hms(2015, 3, 1, 10, 3, 0).unwrap();
        let tight = Utc.with_ymd_and_hms(2015, 3, 1, 10, 22, 0).unwrap();
        assert_eq!(ids(&base.clone().since(loose).since(tight)), vec![6, 7, 8, 9]);
        assert_eq!(ids(&base.since(tight).since(loose)), vec![6, 7, 8, 9]);
    }

    #[test]
    fn latest_partition_only_keeps_the_newest() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let latest = base.clone().using_latest_partition_only();
        assert_eq!(ids(&latest), vec![5, 6, 7, 8, 9]);
        // The base collection still spans both partitions.
        assert_eq!(base.count().unwrap(), 9);
    }

    #[test]
    fn sort_is_last_call_wins() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let sorted = base
            .using_latest_partition_only()
            .sort("id", SortDirection::Ascending)
            .unwrap()
            .sort("timestamp", SortDirection::Descending)
            .unwrap();
        assert_eq!(ids(&sorted), vec![9, 8, 7, 6, 5]);
    }

    #[test]
    fn time_range_uses_sorted_subqueries() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let (first, last) = base.using_latest_partition_only().time_range().unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2015, 3, 1, 10, 20, 0).unwrap());
        assert_eq!(last, Utc.with_ymd_and_hms(2015, 3, 1, 10, 40, 0).unwrap());
    }

    #[test]
    fn window_override_requires_declared_bounds() {
        let base = RemoteCollection::connect(two_partition_store(), "tweets").unwrap();
        let start = Utc.with_ymd_and_hms(2015, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2015, 3, 1, 11, 0, 0).unwrap();
        assert!(matches!(
            base.with_window(start, end),
            Err(TweetsetError::WindowingPrecondition(_))
        ));

        let bounded = base
            .clone()
            .since(Utc.with_ymd_and_hms(2015, 3, 1, 10, 4, 0).unwrap())
            .until(Utc.with_ymd_and_hms(2015, 3, 1, 10, 30, 0).unwrap());
        let windowed = bounded
            .with_window(
                Utc.with_ymd_and_hms(2015, 3, 1, 10, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2015, 3, 1, 10, 11, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(ids(&windowed), vec![2, 3]);
    }
}
