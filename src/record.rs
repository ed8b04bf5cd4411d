//! The normalized record produced from one log line.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Maximum number of bytes kept for the referring site host.
pub(crate) const REFERRER_SITE_MAX: usize = 511;

/// Classification of the client host token.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum IpKind {
    /// Not a textual IP address. Only reachable when IP validation is
    /// disabled, or before any host was parsed.
    #[default]
    Invalid,
    /// An IPv4 address.
    V4,
    /// An IPv6 address.
    V6,
}

/// A single parsed access-log line.
///
/// Fields a template did not produce stay `None` (or their numeric zero
/// value); `status` keeps −1 until a `%s` specifier parses one.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    /// Client host, IPv4 or IPv6 unless IP validation is disabled.
    pub host: Option<String>,
    /// Classification of `host`.
    pub ip_kind: IpKind,
    /// Canonical numeric date text, e.g. `20230611`.
    pub date: Option<String>,
    /// `date` re-parsed as an integer, used as an aggregation key.
    pub numdate: u32,
    /// Canonical time text, `HH:MM:SS`.
    pub time: Option<String>,
    /// Virtual host.
    pub vhost: Option<String>,
    /// Remote user id.
    pub userid: Option<String>,
    /// Cache result, present only when the token is a known cache status.
    pub cache_status: Option<String>,
    /// HTTP method, uppercased canonical form.
    pub method: Option<String>,
    /// HTTP protocol, uppercased canonical form.
    pub protocol: Option<String>,
    /// Requested path, URL-decoded.
    pub request: Option<String>,
    /// Query string, URL-decoded.
    pub query_string: Option<String>,
    /// HTTP status code; −1 until parsed.
    pub status: i32,
    /// Response size in bytes; unparseable sizes count as 0.
    pub response_size: u64,
    /// Time taken to serve the request, always in microseconds.
    pub serve_time_us: u64,
    /// Referrer, or the literal `-` when absent.
    pub referrer: Option<String>,
    /// Search keyphrase extracted from a search-engine referrer.
    pub keyphrase: Option<String>,
    /// Host portion of the referrer, capped at 511 bytes.
    pub referrer_site: String,
    /// User agent, URL-decoded; `-` when the template has no agent.
    pub user_agent: Option<String>,
    /// Response MIME type.
    pub mime_type: Option<String>,
    /// TLS protocol version, e.g. `TLSv1.2`.
    pub tls_version: Option<String>,
    /// TLS cipher suite.
    pub tls_cipher: Option<String>,
    /// Broken-down date and time assembled from the date/time specifiers.
    pub datetime: NaiveDateTime,
}

fn baseline_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl Default for LogRecord {
    fn default() -> Self {
        Self {
            host: None,
            ip_kind: IpKind::default(),
            date: None,
            numdate: 0,
            time: None,
            vhost: None,
            userid: None,
            cache_status: None,
            method: None,
            protocol: None,
            request: None,
            query_string: None,
            status: -1,
            response_size: 0,
            serve_time_us: 0,
            referrer: None,
            keyphrase: None,
            referrer_site: String::new(),
            user_agent: None,
            mime_type: None,
            tls_version: None,
            tls_cipher: None,
            datetime: baseline_datetime(),
        }
    }
}

impl LogRecord {
    /// Store the referring site host, truncating to the capacity limit on a
    /// character boundary.
    pub(crate) fn set_referrer_site(&mut self, host: &str) {
        let mut len = host.len().min(REFERRER_SITE_MAX);
        while !host.is_char_boundary(len) {
            len -= 1;
        }
        self.referrer_site = host[..len].to_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_record_is_unset() {
        let record = LogRecord::default();
        assert_eq!(record.status, -1);
        assert_eq!(record.response_size, 0);
        assert_eq!(record.serve_time_us, 0);
        assert!(record.host.is_none());
        assert_eq!(record.ip_kind, IpKind::Invalid);
        assert_eq!(record.datetime.to_string(), "2000-01-01 00:00:00");
    }

    #[test]
    fn referrer_site_is_capped() {
        let mut record = LogRecord::default();
        let long = "x".repeat(600);
        record.set_referrer_site(&long);
        assert_eq!(record.referrer_site.len(), REFERRER_SITE_MAX);
    }
}
