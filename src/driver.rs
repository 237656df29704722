//! Replays attempt records through a limiter.
//!
//! Records are read one per line as `<key> <outcome>`; each processed record
//! produces one JSON line on the output.

use std::io::{BufRead, Write};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, TurnstileError};
use crate::lockout::{Clock, Evaluation, Limiter};

/// One parsed attempt record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub key: String,
    pub succeeded: bool,
}

/// A JSON output line.
#[derive(Debug, Serialize)]
struct Decision<'a> {
    key: &'a str,
    #[serde(flatten)]
    evaluation: Evaluation,
}

/// Counters for a completed replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records registered with the limiter
    pub processed: usize,
    /// Registrations that came back locked
    pub locked: usize,
    /// Lines skipped as malformed or with a blank key
    pub rejected: usize,
}

/// Parse a single input line.
///
/// Returns `Ok(None)` for blank lines and `#` comments. The outcome is the
/// last whitespace-separated token, so keys may contain inner spaces.
pub fn parse_record(line_number: usize, line: &str) -> Result<Option<Attempt>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (key, outcome) = line
        .rsplit_once(char::is_whitespace)
        .ok_or_else(|| TurnstileError::Parse {
            line: line_number,
            reason: "expected `<key> <outcome>`".to_string(),
        })?;

    let succeeded = match outcome.to_ascii_lowercase().as_str() {
        "ok" | "success" | "true" | "1" => true,
        "fail" | "failure" | "false" | "0" => false,
        other => {
            return Err(TurnstileError::Parse {
                line: line_number,
                reason: format!("unknown outcome `{}`", other),
            })
        }
    };

    Ok(Some(Attempt {
        key: key.trim_end().to_string(),
        succeeded,
    }))
}

/// Register every record from `input` and write one decision per record.
///
/// Malformed lines and blank keys are logged and skipped. I/O failures on
/// either side abort the replay.
pub fn replay<C, R, W>(limiter: &Limiter<C>, input: R, mut output: W) -> Result<ReplaySummary>
where
    C: Clock,
    R: BufRead,
    W: Write,
{
    let mut summary = ReplaySummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;

        let attempt = match parse_record(line_number, &line) {
            Ok(Some(attempt)) => attempt,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Skipping malformed record");
                summary.rejected += 1;
                continue;
            }
        };

        let evaluation = match limiter.register(&attempt.key, attempt.succeeded) {
            Ok(evaluation) => evaluation,
            Err(TurnstileError::InvalidKey) => {
                warn!(line = line_number, "Skipping record with blank key");
                summary.rejected += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        summary.processed += 1;
        if evaluation.is_locked {
            summary.locked += 1;
        }

        let decision = Decision {
            key: &attempt.key,
            evaluation,
        };
        serde_json::to_writer(&mut output, &decision).map_err(std::io::Error::from)?;
        writeln!(output)?;
    }

    output.flush()?;
    debug!(
        processed = summary.processed,
        locked = summary.locked,
        rejected = summary.rejected,
        "Replay finished"
    );
    Ok(summary)
}
