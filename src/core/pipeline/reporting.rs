use std::io::{self, Write};

use itertools::{Itertools, Position};

use crate::core::{
    domain::{OutputFormat, ResultRecord, RunRequest},
    traits::strategy::Strategy,
};

/// Separator used when streaming the JSON encoding: the escaped newline as
/// it appears inside JSON strings.
const JSON_BREAK: &str = "\\n";
const LINE_BREAK: &str = "\n";

/// Decorates a finished record and writes it to the caller's streams.
#[derive(Debug)]
pub struct Reporter<O: Write, E: Write> {
    out: O,
    err: E,
}

impl<O: Write, E: Write> Reporter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Reporter { out, err }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    /// Returns the record exactly as it was emitted.
    #[tracing::instrument(skip_all, fields(format = ?request.format))]
    pub fn report(
        &mut self,
        request: &RunRequest,
        mut record: ResultRecord,
        strategy: &dyn Strategy,
    ) -> io::Result<ResultRecord> {
        strategy.transform_buffer(&mut record);

        if let Some(stdout) = strategy.transform_output(request) {
            record.stdout = stdout;
        }
        if !record.stderr.is_empty() {
            record.stderr = strategy.sanitize_stderr(&record.stderr);
        }
        if !record.stdout.is_empty() {
            record.stdout = strategy.sanitize_stdout(&record.stdout);
        }

        if let Some(shell) = &request.shell_result {
            record.shell = Some(shell.clone());
        }
        record.output_type = strategy.output_type().to_string();

        match request.format {
            OutputFormat::Json => {
                let json = serde_json::to_string(&record)?;
                write_chunked(&mut self.out, &json, JSON_BREAK)?;
            }
            OutputFormat::Plain => {
                write_chunked(&mut self.out, &record.stdout, LINE_BREAK)?;
                write_chunked(&mut self.err, &record.stderr, LINE_BREAK)?;
                if request.debug && record.wall_time > 0 {
                    writeln!(self.out, "{}ms", record.wall_time)?;
                }
            }
        }

        self.out.flush()?;
        self.err.flush()?;

        Ok(record)
    }
}

/// Writes `data` one piece at a time, split on `separator`, with no
/// separator after the final piece.
fn write_chunked<W: Write>(writer: &mut W, data: &str, separator: &str) -> io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }

    for (position, piece) in data.split(separator).with_position() {
        writer.write_all(piece.as_bytes())?;
        if !matches!(position, Position::Last | Position::Only) {
            writer.write_all(separator.as_bytes())?;
        }
    }
    Ok(())
}
