//! The filter predicate vocabulary and its two evaluation forms.
//!
//! Every chainable query operation contributes one [`Filter`]. For the
//! networked backend the accumulated filters are rendered into one-key
//! constraint fragments and deep-merged into a single constraint tree in
//! the store's query vocabulary. For the file backend each filter compiles
//! to a per-record predicate, and the conjunction is evaluated during a
//! forward scan.
use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use rand::Rng;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::trace;

use crate::error::{Result, TweetsetError};
use crate::record::Record;

/// An immutable description of one constraint on which records qualify.
///
/// Filters are plain data so that accumulated predicate lists support
/// equality and debugging; nothing is compiled or evaluated until a
/// collection is iterated or counted.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Case-insensitive OR-of-terms containment on a dotted field path.
    /// The pattern is already regex-escaped term by term.
    FieldContaining { field: String, pattern: String },
    /// Raw, unescaped regex on the body. The caller owns the pattern.
    MatchingRegex { pattern: String },
    /// Strict lower timestamp bound (greater-than, not greater-or-equal).
    Since(DateTime<Utc>),
    /// Strict upper timestamp bound.
    Until(DateTime<Utc>),
    /// Language-code set membership.
    Language(Vec<String>),
    ExcludingRetweets,
    OnlyRetweets,
    GeoEnabled,
    NonGeoEnabled,
    /// Percentage sampling. The networked backend keys this off the stable
    /// per-record `random_number`; the file backend draws fresh per scan.
    Sample(f64),
    /// Author-id set membership.
    OnlyUsers(Vec<i64>),
    /// Record-id set membership.
    IdsLookup(Vec<i64>),
}

impl Filter {
    /// Builds a containment filter, escaping each term so literal regex
    /// metacharacters in search terms stay literal, then OR-ing them.
    pub fn field_containing<S: AsRef<str>>(field: &str, terms: &[S]) -> Self {
        let pattern = terms
            .iter()
            .map(|t| regex::escape(t.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        Filter::FieldContaining {
            field: field.to_string(),
            pattern,
        }
    }

    /// Renders this filter as a one-key constraint fragment in the backing
    /// store's query vocabulary.
    pub fn fragment(&self) -> Value {
        match self {
            Filter::FieldContaining { field, pattern } => {
                json!({ field.as_str(): {"$regex": pattern, "$options": "i"} })
            }
            Filter::MatchingRegex { pattern } => json!({"text": {"$regex": pattern}}),
            Filter::Since(t) => json!({"timestamp": {"$gt": format_bound(*t)}}),
            Filter::Until(t) => json!({"timestamp": {"$lt": format_bound(*t)}}),
            Filter::Language(langs) => json!({"lang": {"$in": langs}}),
            Filter::ExcludingRetweets => json!({"retweeted_status": {"$exists": false}}),
            Filter::OnlyRetweets => json!({"retweeted_status": {"$exists": true}}),
            Filter::GeoEnabled => json!({"coordinates.coordinates": {"$exists": true}}),
            Filter::NonGeoEnabled => json!({"coordinates.coordinates": {"$exists": false}}),
            Filter::Sample(pct) => json!({"random_number": {"$lt": pct}}),
            Filter::OnlyUsers(ids) => json!({"user.id": {"$in": ids}}),
            Filter::IdsLookup(ids) => json!({"id": {"$in": ids}}),
        }
    }

    /// Compiles this filter into its per-record evaluation form.
    pub(crate) fn compile(&self) -> Result<Predicate> {
        Ok(match self {
            Filter::FieldContaining { field, pattern } => Predicate::Matches {
                field: field.clone(),
                regex: Regex::new(&format!("(?i){pattern}"))?,
            },
            Filter::MatchingRegex { pattern } => Predicate::Matches {
                field: String::from("text"),
                regex: Regex::new(pattern)?,
            },
            Filter::Since(t) => Predicate::Since(*t),
            Filter::Until(t) => Predicate::Until(*t),
            Filter::Language(langs) => Predicate::Language(langs.clone()),
            Filter::ExcludingRetweets => Predicate::ExcludingRetweets,
            Filter::OnlyRetweets => Predicate::OnlyRetweets,
            Filter::GeoEnabled => Predicate::GeoEnabled,
            Filter::NonGeoEnabled => Predicate::NonGeoEnabled,
            Filter::Sample(pct) => Predicate::Sample(*pct),
            Filter::OnlyUsers(ids) => Predicate::OnlyUsers(ids.clone()),
            Filter::IdsLookup(ids) => Predicate::IdsLookup(ids.clone()),
        })
    }
}

/// Timestamp bounds travel through constraint trees as RFC 3339 UTC strings.
pub(crate) fn format_bound(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Deep-merges one-key constraint fragments into a single constraint tree.
///
/// Fragments constraining the same path with different sub-keys combine into
/// a multi-key constraint on that path. Identical leaves are idempotent.
/// `$gt`/`$lt` leaves conjoin by tightening (greatest lower bound, least
/// upper bound), since both constraints must hold. Any other leaf collision
/// with differing values is a [`TweetsetError::ConflictingPredicate`].
///
/// The merge is associative and independent of fragment order.
pub fn merge_fragments(fragments: &[Value]) -> Result<Value> {
    let mut merged = Value::Object(Map::new());
    for fragment in fragments {
        merge_into(&mut merged, fragment, &mut Vec::new())?;
    }
    trace!(query = %merged, "merged constraint tree");
    Ok(merged)
}

fn merge_into(target: &mut Value, addition: &Value, path: &mut Vec<String>) -> Result<()> {
    let Value::Object(additions) = addition else {
        return Err(conflict(path, target, addition));
    };
    for (key, value) in additions {
        let Value::Object(target_map) = target else {
            return Err(conflict(path, target, addition));
        };
        path.push(key.clone());
        match target_map.get_mut(key) {
            None => {
                target_map.insert(key.clone(), value.clone());
            }
            Some(existing) if existing.is_object() && value.is_object() => {
                merge_into(existing, value, path)?;
            }
            Some(existing) if existing == value => {}
            Some(existing) => match tighten(key, existing, value) {
                Some(tightened) => *existing = tightened,
                None => return Err(conflict(path, existing, value)),
            },
        }
        path.pop();
    }
    Ok(())
}

/// Bound operators conjoin instead of conflicting: the effective lower
/// bound is the maximum of all `$gt` leaves, the effective upper bound the
/// minimum of all `$lt` leaves.
fn tighten(key: &str, left: &Value, right: &Value) -> Option<Value> {
    let ordering = compare_values(left, right)?;
    match key {
        "$gt" => Some(if ordering == Ordering::Less { right.clone() } else { left.clone() }),
        "$lt" => Some(if ordering == Ordering::Greater { right.clone() } else { left.clone() }),
        _ => None,
    }
}

fn conflict(path: &[String], left: &Value, right: &Value) -> TweetsetError {
    TweetsetError::ConflictingPredicate {
        path: path.join("."),
        left: left.to_string(),
        right: right.to_string(),
    }
}

/// Ordering over constraint-tree scalars. Strings that both parse as
/// RFC 3339 timestamps compare as instants; other strings compare
/// lexicographically; numbers compare numerically.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => {
            match (DateTime::parse_from_rfc3339(l), DateTime::parse_from_rfc3339(r)) {
                (Ok(lt), Ok(rt)) => Some(lt.with_timezone(&Utc).cmp(&rt.with_timezone(&Utc))),
                _ => Some(l.cmp(r)),
            }
        }
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// A filter compiled for per-record evaluation during a file scan.
#[derive(Debug)]
pub(crate) enum Predicate {
    Matches { field: String, regex: Regex },
    Since(DateTime<Utc>),
    Until(DateTime<Utc>),
    Language(Vec<String>),
    ExcludingRetweets,
    OnlyRetweets,
    GeoEnabled,
    NonGeoEnabled,
    Sample(f64),
    OnlyUsers(Vec<i64>),
    IdsLookup(Vec<i64>),
}

impl Predicate {
    pub(crate) fn matches<R: Rng>(
        &self,
        record: &Record,
        default_offset: Option<FixedOffset>,
        rng: &mut R,
    ) -> Result<bool> {
        Ok(match self {
            Predicate::Matches { field, regex } => regex.is_match(&record.field(field)),
            Predicate::Since(t) => record.timestamp_with(default_offset)? > *t,
            Predicate::Until(t) => record.timestamp_with(default_offset)? < *t,
            Predicate::Language(langs) => record
                .lang()
                .is_some_and(|lang| langs.iter().any(|l| l == lang)),
            Predicate::ExcludingRetweets => !record.is_retweet(),
            Predicate::OnlyRetweets => record.is_retweet(),
            Predicate::GeoEnabled => record.is_geo_enabled(),
            Predicate::NonGeoEnabled => !record.is_geo_enabled(),
            Predicate::Sample(pct) => rng.random::<f64>() < *pct,
            Predicate::OnlyUsers(ids) => record.user_id().is_some_and(|id| ids.contains(&id)),
            Predicate::IdsLookup(ids) => record.id().is_some_and(|id| ids.contains(&id)),
        })
    }
}
