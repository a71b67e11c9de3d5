//! Parser for framed status/variables text streams.
//!
//! Handles the two wire formats a feed can arrive in:
//! - vertical blocks, the bordered `| Variable_name | Value |` tables
//!   printed by `mysqladmin extended-status` style output
//! - tab-separated batch rows, as printed by `mysql -B -N`
//!
//! Both are sequences of records framed by the shared sentinel
//! ([`END_STRING`](crate::source::END_STRING)): a row whose key or value
//! equals the sentinel closes the current record. The format is detected
//! from the content of each line, so a capture may even switch formats
//! between records.

use std::io::BufRead;
use std::sync::mpsc::SyncSender;

use tracing::{debug, trace};

use crate::sample::Sample;
use crate::source::END_STRING;

/// Column header of a vertical status block; not a data row.
const VERTICAL_HEADER_KEY: &str = "Variable_name";

/// Reads framed records from `reader` and sends one [`Sample`] per record
/// on `tx` until the stream closes or the receiver goes away.
///
/// Keys are lower-cased on ingestion. Malformed rows are skipped, they
/// never fail the stream or the record. Trailing data with no terminating
/// sentinel is discarded; that is the normal shape of a stream cut off at
/// process shutdown.
pub fn parse_samples<R: BufRead>(reader: R, tx: SyncSender<Sample>) {
    let mut sample = Sample::new();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // A row that does not decode is a malformed row, not a
                // dead stream; the bytes are already consumed, move on.
                trace!("skipping undecodable row");
                continue;
            }
            Err(e) => {
                // An I/O failure on the underlying stream ends the feed;
                // the channel closing is the signal downstream.
                debug!("feed stream closed: {}", e);
                break;
            }
        };

        match parse_row(&line) {
            Row::Pair(key, value) => sample.set(key.to_lowercase(), value),
            Row::EndOfRecord => {
                if tx.send(std::mem::take(&mut sample)).is_err() {
                    return; // consumer gone
                }
            }
            Row::Skip => {}
        }
    }

    if !sample.is_empty() {
        trace!("discarding {} unterminated trailing fields", sample.len());
    }
}

enum Row<'a> {
    /// A key/value data row.
    Pair(&'a str, &'a str),
    /// A sentinel row; the record accumulated so far is complete.
    EndOfRecord,
    /// Border, header, empty or malformed row.
    Skip,
}

fn parse_row(line: &str) -> Row<'_> {
    if let Some(rest) = line.strip_prefix('|') {
        // Vertical block row: `| key | value |`
        let mut fields = rest.split('|').map(str::trim);
        let key = fields.next().unwrap_or("");
        let value = fields.next().unwrap_or("");
        if key == END_STRING || value == END_STRING {
            return Row::EndOfRecord;
        }
        if key.is_empty() || key == VERTICAL_HEADER_KEY {
            return Row::Skip;
        }
        return Row::Pair(key, value);
    }

    if line.starts_with('+') {
        return Row::Skip; // table border
    }

    if let Some((key, value)) = line.split_once('\t') {
        if key == END_STRING || value == END_STRING {
            return Row::EndOfRecord;
        }
        return Row::Pair(key, value);
    }

    // `SELECT 'MYQTOOLSEND'` under -N prints the sentinel on a bare line.
    if line.trim() == END_STRING {
        return Row::EndOfRecord;
    }

    Row::Skip
}
