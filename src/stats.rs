//! Per-source accounting for parsed, ignored and invalid lines.

use crate::error::ParseError;

/// How many distinct error messages are retained for display.
const MAX_LOG_ERRORS: usize = 20;

/// Counters a caller feeds with the outcome of each [`parse_line`] call.
///
/// Soft-ignored lines count as processed but never as invalid. Only the
/// first 20 distinct error messages are kept.
///
/// [`parse_line`]: crate::AccessLogParser::parse_line
#[derive(Clone, Debug, Default)]
pub struct ParseStats {
    processed: u64,
    invalid: u64,
    errors: Vec<String>,
}

impl ParseStats {
    /// Create empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successfully parsed line.
    pub fn record_valid(&mut self) {
        self.processed += 1;
    }

    /// Count a soft-ignored line (blank or comment).
    pub fn record_ignored(&mut self) {
        self.processed += 1;
    }

    /// Count an invalid line, retaining its message if it is new.
    pub fn record_invalid(&mut self, error: &ParseError) {
        self.processed += 1;
        self.invalid += 1;

        if self.errors.len() >= MAX_LOG_ERRORS {
            return;
        }
        let message = error.to_string();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    /// Lines seen so far, including ignored and invalid ones.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Lines that failed to parse.
    pub fn invalid(&self) -> u64 {
        self.invalid
    }

    /// The retained error messages, oldest first.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}
