//! The log record format, the resume-log loader, and the log task
//! (§4.4, §6 "CSV log format").

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use tokio::sync::mpsc;

use crate::error::RatePipeError;
use crate::hash::Hash128;

/// One completed work item's outcome, ready to be serialized as a CSV row.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub fingerprint: Hash128,
    pub success: bool,
    pub data_fields: Vec<String>,
    pub output_fields: Vec<String>,
}

impl LogRecord {
    /// Render as the ordered CSV columns: hash, result, data fields, output
    /// fields.
    pub fn to_csv_row(&self) -> Vec<String> {
        let mut row = vec![self.fingerprint.to_string(), self.success.to_string()];
        row.extend(self.data_fields.iter().cloned());
        row.extend(self.output_fields.iter().cloned());
        row
    }
}

/// Parse one resume-log data row (header already skipped) into the
/// `(fingerprint, success)` pair needed to populate the skip set.
/// Unparseable rows are fatal per §4.4.
fn parse_resume_row(record: &csv::StringRecord) -> Result<(Hash128, bool), RatePipeError> {
    let hash_col = record
        .get(0)
        .ok_or_else(|| RatePipeError::Resume("missing hash column".to_string()))?;
    let result_col = record
        .get(1)
        .ok_or_else(|| RatePipeError::Resume("missing result column".to_string()))?;
    let fingerprint = Hash128::parse(hash_col).map_err(RatePipeError::Resume)?;
    let success = result_col
        .parse::<bool>()
        .map_err(|e| RatePipeError::Resume(format!("bad result column {result_col:?}: {e}")))?;
    Ok((fingerprint, success))
}

/// Load a previously-written log file and return the set of fingerprints
/// whose most recent recorded result was a success. A missing file is
/// treated as empty, not an error (§8 boundary behaviors).
pub fn load_skip_set(path: &Path) -> Result<HashSet<Hash128>, RatePipeError> {
    let mut skip = HashSet::new();

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(skip),
        Err(e) => return Err(e.into()),
    };

    if file.metadata()?.len() == 0 {
        return Ok(skip);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    for result in reader.records() {
        let record = result?;
        let (fingerprint, success) = parse_resume_row(&record)?;
        if success {
            skip.insert(fingerprint);
        }
    }

    Ok(skip)
}

/// The log column header: `["hash","result"] ++ log_data ++ log_output`.
pub fn header_row(log_data: &[String], log_output: &[String]) -> Vec<String> {
    let mut row = vec!["hash".to_string(), "result".to_string()];
    row.extend(log_data.iter().cloned());
    row.extend(log_output.iter().cloned());
    row
}

/// Open (or create) the log file per the §4.4 header policy and return a
/// ready-to-write CSV writer. Must be called before the run starts; the
/// returned writer is then handed to the log task, which is its sole
/// owner thereafter.
pub fn open_log_writer(
    path: &Path,
    resume: bool,
    log_data: &[String],
    log_output: &[String],
) -> Result<csv::Writer<std::fs::File>, RatePipeError> {
    if !resume {
        let _ = std::fs::remove_file(path);
    }

    let needs_header = !path.exists() || path.metadata().map(|m| m.len() == 0).unwrap_or(true);

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;

    if needs_header {
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(header_row(log_data, log_output))?;
        writer.flush()?;
        Ok(writer)
    } else {
        // Existing non-empty file in resume mode: separate the prior
        // content from new rows with a blank line, matching the original's
        // `logFile.WriteString("\n")`.
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(b"\n")?;
        Ok(csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file))
    }
}

/// Run the log task: consume `LogRecord`s from `log_rx` and write CSV rows,
/// flushing every 1000 records and once more on exit. The task exits only
/// when `log_rx` is closed (i.e. when the coordinator drops the last
/// sender after `workers_finished`), never on engine cancellation, so
/// in-flight records are never lost on an abort.
pub async fn run_log_task(
    mut writer: csv::Writer<std::fs::File>,
    mut log_rx: mpsc::Receiver<LogRecord>,
) -> Result<(), RatePipeError> {
    let mut count: u64 = 0;
    while let Some(record) = log_rx.recv().await {
        writer.write_record(record.to_csv_row())?;
        count += 1;
        if count % 1000 == 0 {
            writer.flush()?;
        }
    }
    writer.flush()?;
    tracing::debug!("log task exiting");
    Ok(())
}
