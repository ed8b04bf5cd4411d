//! A format-driven parser that turns raw web access log lines into
//! normalized records.
//!
//! A template of `%`-specifiers interleaved with literal delimiters drives
//! tokenization; each extracted span is validated and normalized into a
//! [`LogRecord`] field (host, date/time, method, URL, status, sizes, TLS
//! parameters and so on). Templates that are themselves well-formed
//! key/value documents switch the parser into document mode, where each
//! scalar of the incoming line is matched by its dotted key path. Named
//! presets cover the common formats (NCSA combined, CLF, W3C, CloudFront,
//! AWS ELB/ALB/S3, Squid, Caddy, Traefik).
//!
//! ```
//! use accesslog_parser::{AccessLogParser, ParserConfig};
//!
//! let parser = AccessLogParser::new(ParserConfig::new("COMBINED"))?;
//! let record = parser
//!     .parse_line(r#"114.5.1.4 - - [11/Jun/2023:01:23:45 +0800] "GET /index.html HTTP/1.1" 200 568 "-" "curl/7.82.0""#)
//!     .map_err(|err| err.to_string())?
//!     .expect("not a comment line");
//! assert_eq!(record.host.as_deref(), Some("114.5.1.4"));
//! assert_eq!(record.status, 200);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]

mod config;
mod datetime;
mod error;
pub mod json;
mod parser;
mod record;
mod stats;
mod util;
mod validate;

pub use config::{LogFormatPreset, ParserConfig};
pub use datetime::TimeZone;
pub use error::{ConfigError, ParseError};
pub use parser::AccessLogParser;
pub use record::{IpKind, LogRecord};
pub use stats::ParseStats;
