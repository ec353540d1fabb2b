//! Streaming export of record streams to flat formats.
use std::io::Write;

use tracing::debug;

use crate::error::Result;
use crate::record::Record;

/// Writes the stream as CSV, one row per record, projecting the given
/// dotted-path columns.
///
/// Projection is lenient: a column a record lacks comes out blank, the way
/// [`Record::field`] resolves. Quoting and escaping follow the `csv`
/// writer's defaults. Returns the number of data rows.
pub fn dump_csv<W, I, S>(writer: W, records: I, columns: &[S]) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Result<Record>>,
    S: AsRef<str>,
{
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(columns.iter().map(|c| c.as_ref()))?;
    let mut rows = 0;
    for record in records {
        let record = record?;
        writer.write_record(columns.iter().map(|c| record.field(c.as_ref())))?;
        rows += 1;
    }
    writer.flush()?;
    debug!(rows, "csv export finished");
    Ok(rows)
}

/// Writes the stream as JSON Lines, one document per line. Returns the
/// number of lines written.
pub fn dump_json_lines<W, I>(mut writer: W, records: I) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Result<Record>>,
{
    let mut lines = 0;
    for record in records {
        let record = record?;
        serde_json::to_writer(&mut writer, record.as_value())?;
        writer.write_all(b"\n")?;
        lines += 1;
    }
    writer.flush()?;
    debug!(lines, "json lines export finished");
    Ok(lines)
}
