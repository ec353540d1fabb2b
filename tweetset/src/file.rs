//! The file-backed query collection: one flat archive of serialized
//! records, filtered by a single forward scan.
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use rand::rngs::ThreadRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::{SortDirection, TweetCollection};
use crate::error::{Result, TweetsetError};
use crate::filter::{Filter, Predicate};
use crate::record::Record;

const BACKEND: &str = "file";

/// A query collection over a single archive file of MessagePack-serialized
/// records, scanned front to back.
///
/// Same filter vocabulary as [`crate::RemoteCollection`], but there is no
/// server to push filters to: each filter compiles to a per-record
/// predicate and the conjunction is evaluated during the scan. There are
/// no indices and no cursors, so `sort` and `time_range` fail loudly
/// rather than pretending.
///
/// The archive's recording zone is detected once, from the first record's
/// timestamp, at construction; records with naive timestamps are assumed
/// to be in that zone, so bound comparisons never mix aware and naive
/// values.
#[derive(Clone, Debug)]
pub struct FileCollection {
    path: PathBuf,
    filters: Vec<Filter>,
    limit: Option<u64>,
    default_offset: Option<FixedOffset>,
}

impl FileCollection {
    /// Opens an archive file. A missing file fails here, not at first
    /// iteration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(TweetsetError::Config(format!(
                "archive file not found: {}",
                path.display()
            )));
        }
        let mut scan = RawScan::open(&path)?;
        let default_offset = scan.next_record()?.and_then(|r| r.timestamp_offset());
        debug!(path = %path.display(), ?default_offset, "opened archive");
        Ok(FileCollection {
            path,
            filters: Vec::new(),
            limit: None,
            default_offset,
        })
    }

    /// The accumulated predicate list, in insertion order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

impl TweetCollection for FileCollection {
    type Iter = FileIter;

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

    /// Sorting an arbitrarily large flat file is out of scope for this
    /// backend; the request fails loudly instead of being ignored.
    fn with_sort(self, _field: &str, _direction: SortDirection) -> Result<Self> {
        Err(TweetsetError::Unsupported {
            backend: BACKEND,
            operation: "sort",
        })
    }

    /// Counts matching records. Always a full scan; the limit still caps
    /// the result.
    fn count(&self) -> Result<u64> {
        let mut total = 0;
        for record in self.iter()? {
            record?;
            total += 1;
        }
        Ok(total)
    }

    fn iter(&self) -> Result<Self::Iter> {
        let predicates = self
            .filters
            .iter()
            .map(Filter::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(FileIter {
            scan: Some(RawScan::open(&self.path)?),
            predicates,
            remaining: self.limit,
            default_offset: self.default_offset,
            rng: rand::rng(),
        })
    }

    fn time_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        Err(TweetsetError::Unsupported {
            backend: BACKEND,
            operation: "time_range",
        })
    }

    fn timezone_hint(&self) -> Option<FixedOffset> {
        self.default_offset
    }
}

/// Writes records to an archive file in the sequential MessagePack format
/// [`FileCollection`] reads.
pub fn write_archive<P: AsRef<Path>>(path: P, records: &[Record]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        let mut serializer = rmp_serde::Serializer::new(&mut writer);
        record.serialize(&mut serializer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Sequential decoder over an archive file.
struct RawScan {
    reader: BufReader<File>,
}

impl RawScan {
    fn open(path: &Path) -> Result<Self> {
        Ok(RawScan {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Decodes the next record, or `None` at a clean end of file.
    fn next_record(&mut self) -> Result<Option<Record>> {
        let mut deserializer = rmp_serde::Deserializer::new(&mut self.reader);
        match Record::deserialize(&mut deserializer) {
            Ok(record) => Ok(Some(record)),
            Err(rmp_serde::decode::Error::InvalidMarkerRead(ref e))
                if e.kind() == ErrorKind::UnexpectedEof =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lazy record stream over an archive file.
///
/// Holds the open file handle; the handle is released as soon as the scan
/// finishes or the iterator is dropped, whichever comes first. The limit
/// counts *matching* records, not records read.
pub struct FileIter {
    scan: Option<RawScan>,
    predicates: Vec<Predicate>,
    remaining: Option<u64>,
    default_offset: Option<FixedOffset>,
    rng: ThreadRng,
}

impl FileIter {
    fn accept(&mut self, record: &Record) -> Result<bool> {
        let FileIter {
            predicates,
            default_offset,
            rng,
            ..
        } = self;
        for predicate in predicates.iter() {
            if !predicate.matches(record, *default_offset, &mut *rng)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Iterator for FileIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            self.scan = None;
            return None;
        }
        loop {
            let scan = self.scan.as_mut()?;
            match scan.next_record() {
                Ok(Some(record)) => match self.accept(&record) {
                    Ok(true) => {
                        if let Some(rem) = self.remaining.as_mut() {
                            *rem -= 1;
                        }
                        return Some(Ok(record));
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.scan = None;
                        return Some(Err(e));
                    }
                },
                Ok(None) => {
                    self.scan = None;
                    return None;
                }
                Err(e) => {
                    self.scan = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
