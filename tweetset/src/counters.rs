//! Whole-collection counting reductions.
//!
//! Each function consumes a record stream (usually `collection.iter()?`)
//! and folds it into a small summary, so the full result set never has to
//! be materialized.
use std::collections::{BTreeMap, HashSet};

use crate::error::Result;
use crate::record::Record;

/// Per-category occurrence tallies across a record stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub total: u64,
    pub retweet: u64,
    pub geo_enabled: u64,
    pub hashtag: u64,
    pub mention: u64,
    pub url: u64,
    pub image: u64,
}

/// Tallies retweets, geotagged records and entity kinds in one pass.
pub fn entity_counts<I>(records: I) -> Result<EntityCounts>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut counts = EntityCounts::default();
    for record in records {
        let record = record?;
        counts.total += 1;
        counts.retweet += u64::from(record.is_retweet());
        counts.geo_enabled += u64::from(record.is_geo_enabled());
        counts.hashtag += u64::from(record.has_hashtag());
        counts.mention += u64::from(record.has_mention());
        counts.url += u64::from(record.has_url());
        counts.image += u64::from(record.has_image());
    }
    Ok(counts)
}

/// The most common self-reported author locations.
///
/// Each author is counted once no matter how many records they have, so a
/// prolific account cannot inflate its location. Blank locations and
/// records without an author id are skipped.
pub fn top_user_locations<I>(records: I, n: usize) -> Result<Vec<(String, u64)>>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut seen = HashSet::new();
    let mut counts = BTreeMap::new();
    for record in records {
        let record = record?;
        let Some(user_id) = record.user_id() else {
            continue;
        };
        if !seen.insert(user_id) {
            continue;
        }
        match record.user_location() {
            Some(location) if !location.trim().is_empty() => {
                *counts.entry(location.to_string()).or_insert(0) += 1;
            }
            _ => {}
        }
    }
    Ok(top_k(&counts, n))
}

/// Tallies records per language.
///
/// Languages outside `known` fold into `"other"`; records without a
/// language tag fold into `"unk"`. An empty `known` list keeps every tag
/// as-is.
pub fn language_counts<I, S>(records: I, known: &[S]) -> Result<BTreeMap<String, u64>>
where
    I: IntoIterator<Item = Result<Record>>,
    S: AsRef<str>,
{
    let mut counts = BTreeMap::new();
    for record in records {
        let record = record?;
        let key = match record.lang() {
            None => "unk",
            Some(lang) if known.is_empty() || known.iter().any(|k| k.as_ref() == lang) => lang,
            Some(_) => "other",
        };
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Number of distinct author ids in the stream.
pub fn unique_users<I>(records: I) -> Result<u64>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut seen = HashSet::new();
    for record in records {
        if let Some(user_id) = record?.user_id() {
            seen.insert(user_id);
        }
    }
    Ok(seen.len() as u64)
}

/// Tallies tokens produced by `tokenizer` over each record's text.
pub fn token_counts<I, F>(records: I, tokenizer: F) -> Result<BTreeMap<String, u64>>
where
    I: IntoIterator<Item = Result<Record>>,
    F: Fn(&str) -> Vec<String>,
{
    let mut counts = BTreeMap::new();
    for record in records {
        let record = record?;
        for token in tokenizer(record.text()) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// The `k` largest entries, descending by count. Ties rank alphabetically.
pub fn top_k(counts: &BTreeMap<String, u64>, k: usize) -> Vec<(String, u64)> {
    let mut ranked: Vec<(String, u64)> = counts
        .iter()
        .map(|(name, count)| (name.clone(), *count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}
