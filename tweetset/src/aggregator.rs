//! Time-bucketed aggregation over query collections.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use tracing::debug;

use crate::collection::TweetCollection;
use crate::error::{Result, TweetsetError};
use crate::record::Record;
use crate::remote::RemoteCollection;
use crate::store::DocumentStore;

/// Calendar unit a window grid is aligned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    /// Rounds an instant down to the start of its unit.
    pub fn truncate(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let t = t - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()));
        match self {
            TimeUnit::Seconds => t,
            TimeUnit::Minutes => t - Duration::seconds(i64::from(t.second())),
            TimeUnit::Hours => {
                t - Duration::seconds(i64::from(t.minute() * 60 + t.second()))
            }
            TimeUnit::Days => {
                t - Duration::seconds(i64::from(
                    t.hour() * 3600 + t.minute() * 60 + t.second(),
                ))
            }
        }
    }

    fn duration(&self, count: u32) -> Duration {
        let n = i64::from(count);
        match self {
            TimeUnit::Days => Duration::days(n),
            TimeUnit::Hours => Duration::hours(n),
            TimeUnit::Minutes => Duration::minutes(n),
            TimeUnit::Seconds => Duration::seconds(n),
        }
    }
}

/// Buckets a time-sorted record stream into a dense grid of fixed-width
/// windows and reduces each bucket.
///
/// The grid starts at the first record's timestamp rounded down to the
/// configured unit and advances in steps of `count` units. Windows with no
/// records are still emitted, so consecutive results line up on a gapless
/// time axis.
#[derive(Clone, Copy, Debug)]
pub struct Aggregator {
    unit: TimeUnit,
    count: u32,
}

impl Aggregator {
    pub fn new(unit: TimeUnit, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(TweetsetError::Config(String::from(
                "aggregation step must be at least one unit",
            )));
        }
        Ok(Aggregator { unit, count })
    }

    /// The width of one window.
    pub fn step(&self) -> Duration {
        self.unit.duration(self.count)
    }

    /// Buckets a time-sorted record stream into windows.
    ///
    /// Records with naive timestamps are interpreted in `default_offset`.
    /// The stream must be sorted by timestamp; a record older than the
    /// current window is folded into it rather than reopening a past one.
    pub fn windows<I>(&self, records: I, default_offset: Option<FixedOffset>) -> Windows<I::IntoIter>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        Windows {
            source: records.into_iter(),
            unit: self.unit,
            step: self.step(),
            default_offset,
            next_start: None,
            pending: None,
            done: false,
        }
    }

    /// Reduces each window of the collection with `reducer` and assembles
    /// the dense result table. Groups absent from a window read as zero.
    pub fn grouped_result<C, F>(&self, collection: &C, mut reducer: F) -> Result<GroupedTable>
    where
        C: TweetCollection,
        F: FnMut(&[Record]) -> BTreeMap<String, u64>,
    {
        let offset = collection.timezone_hint();
        let mut index = Vec::new();
        let mut sparse = Vec::new();
        for window in self.windows(collection.iter()?, offset) {
            let (start, records) = window?;
            index.push(start);
            sparse.push(reducer(&records));
        }
        debug!(windows = index.len(), "grouped result assembled");
        Ok(GroupedTable::from_sparse(index, sparse))
    }

    /// Like [`Aggregator::grouped_result`], keeping only the `n` groups with
    /// the largest totals across the whole span. Ties rank alphabetically.
    pub fn grouped_top_n<C, F>(&self, collection: &C, reducer: F, n: usize) -> Result<GroupedTable>
    where
        C: TweetCollection,
        F: FnMut(&[Record]) -> BTreeMap<String, u64>,
    {
        let table = self.grouped_result(collection, reducer)?;
        let mut ranked = table.column_totals();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        let names: Vec<String> = ranked.into_iter().map(|(name, _)| name).collect();
        Ok(table.select_columns(&names))
    }

    /// Per-window record counts.
    pub fn counts<C>(&self, collection: &C) -> Result<Vec<(DateTime<Utc>, u64)>>
    where
        C: TweetCollection,
    {
        let offset = collection.timezone_hint();
        let mut out = Vec::new();
        for window in self.windows(collection.iter()?, offset) {
            let (start, records) = window?;
            out.push((start, records.len() as u64));
        }
        Ok(out)
    }

    /// Splits a bounded remote collection into one sub-query per window.
    ///
    /// The grid runs from the collection's lower bound rounded down to the
    /// unit, up to its upper bound. Both bounds must be declared, since the
    /// store is never asked to enumerate an open-ended span.
    pub fn window_queries<S>(
        &self,
        collection: &RemoteCollection<S>,
    ) -> Result<Vec<(DateTime<Utc>, RemoteCollection<S>)>>
    where
        S: DocumentStore + Clone,
    {
        let since = collection.since_bound().ok_or_else(|| {
            TweetsetError::WindowingPrecondition(String::from(
                "window queries need a declared lower time bound",
            ))
        })?;
        let until = collection.until_bound().ok_or_else(|| {
            TweetsetError::WindowingPrecondition(String::from(
                "window queries need a declared upper time bound",
            ))
        })?;
        let step = self.step();
        let mut start = self.unit.truncate(since);
        let mut out = Vec::new();
        while start < until {
            let end = start + step;
            out.push((start, collection.with_window(start, end)?));
            start = end;
        }
        Ok(out)
    }

    /// Per-window counts computed store-side, one counted sub-query per
    /// window instead of one record stream.
    pub fn counts_by_query<S>(
        &self,
        collection: &RemoteCollection<S>,
    ) -> Result<Vec<(DateTime<Utc>, u64)>>
    where
        S: DocumentStore + Clone,
    {
        self.window_queries(collection)?
            .into_iter()
            .map(|(start, query)| Ok((start, query.count()?)))
            .collect()
    }
}

/// Window iterator produced by [`Aggregator::windows`].
///
/// Yields `(window_start, records)` pairs, including empty windows between
/// occupied ones. An empty source yields no windows at all. The first
/// error from the source (or an unparsable timestamp) ends the stream.
pub struct Windows<I> {
    source: I,
    unit: TimeUnit,
    step: Duration,
    default_offset: Option<FixedOffset>,
    next_start: Option<DateTime<Utc>>,
    pending: Option<(DateTime<Utc>, Record)>,
    done: bool,
}

impl<I> Windows<I>
where
    I: Iterator<Item = Result<Record>>,
{
    fn pull(&mut self) -> Option<Result<(DateTime<Utc>, Record)>> {
        let record = match self.source.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        match record.timestamp_with(self.default_offset) {
            Ok(ts) => Some(Ok((ts, record))),
            Err(e) => Some(Err(e)),
        }
    }
}

impl<I> Iterator for Windows<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<(DateTime<Utc>, Vec<Record>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let start = match self.next_start {
            Some(start) => start,
            None => match self.pull() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok((ts, record))) => {
                    let start = self.unit.truncate(ts);
                    self.pending = Some((ts, record));
                    self.next_start = Some(start);
                    start
                }
            },
        };
        let end = start + self.step;
        let mut bucket = Vec::new();
        loop {
            let (ts, record) = match self.pending.take() {
                Some(held) => held,
                None => match self.pull() {
                    None => {
                        self.done = true;
                        return Some(Ok((start, bucket)));
                    }
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(item)) => item,
                },
            };
            if ts < end {
                bucket.push(record);
            } else {
                self.pending = Some((ts, record));
                self.next_start = Some(end);
                return Some(Ok((start, bucket)));
            }
        }
    }
}

/// Dense grouped-aggregation result: one row per window, one column per
/// group, zeros where a group did not occur.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedTable {
    index: Vec<DateTime<Utc>>,
    columns: Vec<String>,
    rows: Vec<Vec<u64>>,
}

impl GroupedTable {
    fn from_sparse(index: Vec<DateTime<Utc>>, sparse: Vec<BTreeMap<String, u64>>) -> Self {
        let columns: Vec<String> = sparse
            .iter()
            .flat_map(|groups| groups.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let rows = sparse
            .into_iter()
            .map(|groups| {
                columns
                    .iter()
                    .map(|name| groups.get(name).copied().unwrap_or(0))
                    .collect()
            })
            .collect();
        GroupedTable {
            index,
            columns,
            rows,
        }
    }

    /// Window start instants, one per row.
    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row values in column order, one row per window.
    pub fn rows(&self) -> &[Vec<u64>] {
        &self.rows
    }

    /// Sum of each column across all windows, in column order.
    pub fn column_totals(&self) -> Vec<(String, u64)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let total = self.rows.iter().map(|row| row[i]).sum();
                (name.clone(), total)
            })
            .collect()
    }

    /// A narrowed table keeping `names` in the given order. Names the table
    /// does not know read as all-zero columns.
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> GroupedTable {
        let picks: Vec<Option<usize>> = names
            .iter()
            .map(|name| self.columns.iter().position(|c| c == name.as_ref()))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                picks
                    .iter()
                    .map(|pick| pick.map_or(0, |i| row[i]))
                    .collect()
            })
            .collect();
        GroupedTable {
            index: self.index.clone(),
            columns: names.iter().map(|n| n.as_ref().to_string()).collect(),
            rows,
        }
    }
}
