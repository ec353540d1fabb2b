//! The tweet record: a read-only nested key-value document.
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TweetsetError};

/// One social-media post, as a nested document.
///
/// Records are heterogeneous: any field may be absent or oddly shaped.
/// Dotted-path access is therefore lenient by default ([`Record::field`]
/// yields a blank string on any resolution failure); callers who want the
/// failure surfaced use [`Record::try_field`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    pub fn new(document: Value) -> Self {
        Record(document)
    }

    /// The underlying document tree.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Resolves a dotted path against the document.
    ///
    /// Each segment addresses a mapping key, or a numeric index when the
    /// current value is an array. Missing keys, out-of-range indices, type
    /// mismatches and explicit nulls all resolve to `None`.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Lenient string projection of a dotted path.
    ///
    /// Resolution failures yield a blank string. Array values are rendered
    /// as their comma-joined elements.
    pub fn field(&self, path: &str) -> String {
        match self.resolve(path) {
            None => String::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(render_scalar)
                .collect::<Vec<_>>()
                .join(","),
            Some(value) => render_scalar(value),
        }
    }

    /// Strict variant of [`Record::field`]: any resolution failure is an
    /// error instead of a blank value.
    pub fn try_field(&self, path: &str) -> Result<&Value> {
        self.resolve(path)
            .ok_or_else(|| TweetsetError::FieldNotFound(path.to_string()))
    }

    pub fn id(&self) -> Option<i64> {
        self.resolve("id").and_then(Value::as_i64)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.resolve("user.id").and_then(Value::as_i64)
    }

    /// The free-text body, blank when absent.
    pub fn text(&self) -> &str {
        self.resolve("text").and_then(Value::as_str).unwrap_or("")
    }

    pub fn lang(&self) -> Option<&str> {
        self.resolve("lang").and_then(Value::as_str)
    }

    /// The author's self-reported location.
    pub fn user_location(&self) -> Option<&str> {
        self.resolve("user.location").and_then(Value::as_str)
    }

    /// Whether the record carries a retweeted-from reference.
    pub fn is_retweet(&self) -> bool {
        self.resolve("retweeted_status").is_some()
    }

    /// Whether the record carries geocoordinates.
    pub fn is_geo_enabled(&self) -> bool {
        self.resolve("coordinates.coordinates").is_some()
    }

    /// The stable per-record sampling key assigned at ingestion time.
    pub fn random_key(&self) -> Option<f64> {
        self.resolve("random_number").and_then(Value::as_f64)
    }

    pub fn has_hashtag(&self) -> bool {
        self.has_entities("entities.hashtags")
    }

    pub fn has_mention(&self) -> bool {
        self.has_entities("entities.user_mentions")
    }

    pub fn has_url(&self) -> bool {
        self.has_entities("entities.urls")
    }

    pub fn has_image(&self) -> bool {
        self.has_entities("entities.media")
    }

    fn has_entities(&self, path: &str) -> bool {
        matches!(self.resolve(path), Some(Value::Array(items)) if !items.is_empty())
    }

    /// Parses the record's `timestamp` field, assuming UTC for naive values.
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        self.timestamp_with(None)
    }

    /// Parses the record's `timestamp` field.
    ///
    /// RFC 3339 strings with an offset are honored as written. Naive strings
    /// assume `default_offset` (UTC when `None`), so archives recorded
    /// without zone information still compare cleanly against aware bounds.
    /// Integer values are epoch milliseconds.
    pub fn timestamp_with(&self, default_offset: Option<FixedOffset>) -> Result<DateTime<Utc>> {
        let value = self.resolve("timestamp").ok_or_else(|| {
            TweetsetError::InvalidTimestamp {
                value: String::from("<missing>"),
                reason: String::from("record has no timestamp field"),
            }
        })?;
        match value {
            Value::Number(n) => {
                let millis = n.as_i64().ok_or_else(|| invalid(value, "not a whole number"))?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| invalid(value, "epoch milliseconds out of range"))
            }
            Value::String(s) => parse_timestamp(s, default_offset),
            _ => Err(invalid(value, "expected a string or epoch milliseconds")),
        }
    }

    /// The zone offset carried by the record's timestamp, when it has one.
    /// Used to detect an archive's recording zone from its first record.
    pub fn timestamp_offset(&self) -> Option<FixedOffset> {
        let s = self.resolve("timestamp")?.as_str()?;
        DateTime::parse_from_rfc3339(s).ok().map(|dt| *dt.offset())
    }
}

impl From<Value> for Record {
    fn from(document: Value) -> Self {
        Record::new(document)
    }
}

fn invalid(value: &Value, reason: &str) -> TweetsetError {
    TweetsetError::InvalidTimestamp {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_timestamp(s: &str, default_offset: Option<FixedOffset>) -> Result<DateTime<Utc>> {
    if let Ok(aware) = DateTime::parse_from_rfc3339(s) {
        return Ok(aware.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| TweetsetError::InvalidTimestamp {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
    let aware = match default_offset {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| TweetsetError::InvalidTimestamp {
                value: s.to_string(),
                reason: String::from("ambiguous local time"),
            })?
            .with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    };
    Ok(aware)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
