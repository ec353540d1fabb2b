//! The capability interface shared by both query-collection backends.
use chrono::{DateTime, FixedOffset, Utc};

use crate::error::Result;
use crate::filter::Filter;
use crate::record::Record;

/// Direction for server-side ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A lazily-evaluated, immutable query collection.
///
/// Implementations hold a backing-store reference plus accumulated filter
/// state. Every filter-adding or limit/sort-setting operation returns a new
/// collection value; the receiver is never mutated, so a base query can be
/// branched many ways without interference:
///
/// ```ignore
/// let base = collection.language(&["en"]);
/// let early = base.clone().until(cutoff);
/// let late = base.since(cutoff);
/// ```
///
/// No I/O happens until a terminal operation (`iter`, `count`, `texts`,
/// `time_range`) runs. Filter accumulation is side-effect-free and cannot
/// fail; conflicts between predicates only surface at evaluation time.
pub trait TweetCollection: Sized {
    /// The lazy record stream produced by evaluation.
    type Iter: Iterator<Item = Result<Record>>;

    /// Returns a new collection with one more filter appended.
    fn with_filter(self, filter: Filter) -> Self;

    /// Returns a new collection capped at `count` total matching records.
    fn with_limit(self, count: u64) -> Self;

    /// Requests server-side ordering. Only one sort field applies at a time
    /// (last call wins, unlike filters, which conjoin). Backends without
    /// sort support fail loudly here.
    fn with_sort(self, field: &str, direction: SortDirection) -> Result<Self>;

    /// Evaluates the accumulated filters and counts matching records,
    /// reflecting any limit truncation.
    fn count(&self) -> Result<u64>;

    /// Evaluates the accumulated filters, yielding matching records
    /// lazily. Dropping the iterator early releases any held cursor or
    /// file handle.
    fn iter(&self) -> Result<Self::Iter>;

    /// The (earliest, latest) record timestamps under the current filters.
    fn time_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)>;

    /// The zone offset to assume for records whose timestamps carry none.
    fn timezone_hint(&self) -> Option<FixedOffset> {
        None
    }

    /// Only records where `field` contains one of `terms` (case-insensitive;
    /// terms are OR'd and regex-escaped).
    fn field_containing<S: AsRef<str>>(self, field: &str, terms: &[S]) -> Self {
        self.with_filter(Filter::field_containing(field, terms))
    }

    /// Only records whose body contains one of `terms`.
    ///
    /// `collection.containing(&["penguins", "antarctica"])` matches records
    /// containing either term.
    fn containing<S: AsRef<str>>(self, terms: &[S]) -> Self {
        self.field_containing("text", terms)
    }

    /// Only records whose author location contains one of `terms`.
    fn user_location_containing<S: AsRef<str>>(self, terms: &[S]) -> Self {
        self.field_containing("user.location", terms)
    }

    /// Only records whose body matches a raw regex. The pattern is used as
    /// given; the caller is responsible for its syntax and case behavior.
    fn matching_regex(self, pattern: &str) -> Self {
        self.with_filter(Filter::MatchingRegex {
            pattern: pattern.to_string(),
        })
    }

    /// Only records authored strictly after `t`.
    fn since(self, t: DateTime<Utc>) -> Self {
        self.with_filter(Filter::Since(t))
    }

    /// Only records authored strictly before `t`.
    fn until(self, t: DateTime<Utc>) -> Self {
        self.with_filter(Filter::Until(t))
    }

    /// Only records in one of the given languages.
    fn language<S: AsRef<str>>(self, langs: &[S]) -> Self {
        self.with_filter(Filter::Language(
            langs.iter().map(|l| l.as_ref().to_string()).collect(),
        ))
    }

    /// Only records that are not retweets.
    fn excluding_retweets(self) -> Self {
        self.with_filter(Filter::ExcludingRetweets)
    }

    /// Only retweets.
    fn only_retweets(self) -> Self {
        self.with_filter(Filter::OnlyRetweets)
    }

    /// Only geo-tagged records.
    fn geo_enabled(self) -> Self {
        self.with_filter(Filter::GeoEnabled)
    }

    /// Only records without geocoordinates.
    fn non_geo_enabled(self) -> Self {
        self.with_filter(Filter::NonGeoEnabled)
    }

    /// Approximately `pct` of the records. On the networked backend this
    /// keys off the stable per-record `random_number`, so repeated calls at
    /// the same rate select the same subset; the file backend draws fresh
    /// per scan.
    fn sample(self, pct: f64) -> Self {
        self.with_filter(Filter::Sample(pct))
    }

    /// Only records authored by the given user ids.
    fn only_for_users(self, ids: &[i64]) -> Self {
        self.with_filter(Filter::OnlyUsers(ids.to_vec()))
    }

    /// Only records with the given ids.
    fn ids_lookup(self, ids: &[i64]) -> Self {
        self.with_filter(Filter::IdsLookup(ids.to_vec()))
    }

    /// Caps total results at `count`, drawn from the start of the
    /// collection (across partitions in order, for the networked backend).
    fn limit(self, count: u64) -> Self {
        self.with_limit(count)
    }

    /// Alias for [`TweetCollection::with_sort`].
    fn sort(self, field: &str, direction: SortDirection) -> Result<Self> {
        self.with_sort(field, direction)
    }

    /// Materializes the bodies of all matching records.
    fn texts(&self) -> Result<Vec<String>> {
        self.iter()?
            .map(|record| record.map(|r| r.text().to_string()))
            .collect()
    }
}
