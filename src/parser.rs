//! The format-driven line parser: template walking, per-specifier token
//! extraction, and record assembly.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::debug;

use crate::config::{ParserConfig, ResolvedFormat};
use crate::datetime::{format_date, format_time, parse_datetime};
use crate::error::{ConfigError, ParseError};
use crate::json::{walk_document, WalkError};
use crate::record::{IpKind, LogRecord};
use crate::util::{
    advance_one, decode_url, find_char, leading_whitespace, skip_whitespace, take_token,
    trim_ascii,
};
use crate::validate::{
    classify_ip, extract_method, extract_protocol, is_cache_status, is_valid_status,
};

const GOOGLE_HOSTS: [&str; 6] = [
    "http://www.google.",
    "http://webcache.googleusercontent.com/",
    "http://translate.googleusercontent.com/",
    "https://www.google.",
    "https://webcache.googleusercontent.com/",
    "https://translate.googleusercontent.com/",
];

/// Parser for one configured log format.
///
/// Construction resolves the format once (preset expansion, unescaping,
/// document detection); parsing a line afterwards touches no shared mutable
/// state, so one parser can serve any number of threads.
#[derive(Debug)]
pub struct AccessLogParser {
    config: ParserConfig,
    format: ResolvedFormat,
    /// Document mode only: dotted key path to the specifier pattern applied
    /// to values at that path, in template order.
    specs: IndexMap<String, String>,
    bandwidth_seen: AtomicBool,
    serve_time_seen: AtomicBool,
}

impl AccessLogParser {
    /// Build a parser from the given configuration.
    pub fn new(config: ParserConfig) -> Result<Self, ConfigError> {
        let format = config.resolve()?;

        let mut specs = IndexMap::new();
        if format.is_json {
            walk_document::<ConfigError>(
                format.log_format.as_bytes(),
                true,
                &mut |path, value| {
                    specs.insert(path.to_owned(), value.to_owned());
                    Ok(())
                },
            )
            .map_err(|_| ConfigError::InvalidJsonTemplate)?;
        }

        Ok(Self {
            config,
            format,
            specs,
            bandwidth_seen: AtomicBool::new(false),
            serve_time_seen: AtomicBool::new(false),
        })
    }

    /// The configuration this parser was built from.
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Whether lines are decoded as structured documents.
    pub fn is_document_format(&self) -> bool {
        self.format.is_json
    }

    /// Whether the template carries a response-size specifier.
    pub fn bandwidth_expected(&self) -> bool {
        self.format.expects_bandwidth
    }

    /// Whether the template carries a serve-time specifier.
    pub fn serve_time_expected(&self) -> bool {
        self.format.expects_serve_time
    }

    /// Whether any parsed line has produced a response size so far.
    pub fn bandwidth_seen(&self) -> bool {
        self.bandwidth_seen.load(Ordering::Relaxed)
    }

    /// Whether any parsed line has produced a serve time so far.
    pub fn serve_time_seen(&self) -> bool {
        self.serve_time_seen.load(Ordering::Relaxed)
    }

    /// Parse one line.
    ///
    /// Blank lines and `#` comments are soft-ignored and return `Ok(None)`.
    /// A well-formed line yields the populated record; anything else yields
    /// the first specifier failure, or a missing-field error when the
    /// template matched but produced no host, date or request.
    pub fn parse_line(&self, line: &str) -> Result<Option<LogRecord>, ParseError> {
        if line.is_empty() || line.starts_with('#') || line.starts_with('\n') {
            return Ok(None);
        }

        let mut record = LogRecord::default();
        let result = if self.format.is_json {
            self.parse_document(&mut record, line)
        } else {
            self.run_template(&mut record, line, &self.format.log_format)
        };
        if let Err(err) = result {
            debug!(message = "Discarding invalid line.", error = %err);
            return Err(err);
        }

        if record.host.is_none() {
            return Err(ParseError::MissingHost);
        }
        if record.date.is_none() {
            return Err(ParseError::MissingDate);
        }
        if record.request.is_none() {
            return Err(ParseError::MissingRequest);
        }
        if record.user_agent.is_none() {
            record.user_agent = Some("-".to_owned());
        }

        Ok(Some(record))
    }

    /// Parse one line from raw bytes, replacing invalid UTF-8 sequences and
    /// stripping any trailing newline.
    pub fn parse_bytes(&self, bytes: Bytes) -> Result<Option<LogRecord>, ParseError> {
        let line = String::from_utf8_lossy(&bytes);
        self.parse_line(line.trim_end_matches(['\r', '\n']))
    }

    /// Decode a document-mode line: every scalar is looked up by its dotted
    /// path and replayed through the specifier registered for it.
    fn parse_document(&self, record: &mut LogRecord, line: &str) -> Result<(), ParseError> {
        walk_document(line.as_bytes(), true, &mut |path, value| {
            if value.is_empty() {
                return Ok(());
            }
            let Some(spec) = self.specs.get(path) else {
                return Ok(());
            };
            self.run_template(record, value, spec)
        })
        .map_err(|err| match err {
            WalkError::Document(json) => ParseError::MalformedDocument {
                message: json.to_string(),
            },
            WalkError::Visitor(parse) => parse,
        })
    }

    /// Walk the template over the input. `%` starts a specifier, a bare `~`
    /// marks the next specifier as special, and every other template
    /// character consumes one input character.
    fn run_template(
        &self,
        record: &mut LogRecord,
        mut input: &str,
        template: &str,
    ) -> Result<(), ParseError> {
        if input.is_empty() {
            return Err(ParseError::LineIncompatible);
        }

        let fmt: Vec<char> = template.chars().collect();
        let mut i = 0;
        let mut perc = false;
        let mut tilde = false;

        while i < fmt.len() {
            let c = fmt[i];
            if c == '%' {
                perc = true;
                i += 1;
                continue;
            }
            if c == '~' && !perc {
                tilde = true;
                i += 1;
                continue;
            }
            if input.is_empty() {
                return Err(ParseError::LineIncompatible);
            }
            if input.starts_with('\n') {
                return Ok(());
            }

            if tilde {
                self.special_specifier(record, &mut input, &fmt, &mut i)?;
                tilde = false;
            } else if perc {
                let end = fmt
                    .get(i + 1)
                    .map(|&delim| delim.to_string())
                    .unwrap_or_default();
                self.parse_specifier(record, &mut input, c, &end)?;
                perc = false;
            } else {
                advance_one(&mut input);
            }
            i += 1;
        }

        Ok(())
    }

    /// Extract and store one field. A specifier whose destination is already
    /// set skips through the next delimiter without touching the record.
    fn parse_specifier(
        &self,
        record: &mut LogRecord,
        input: &mut &str,
        spec: char,
        end: &str,
    ) -> Result<(), ParseError> {
        let double_decode = self.config.double_decode;
        match spec {
            // date
            'd' => {
                if record.date.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                // A date format with spaces may face padded input
                // (`Dec  2` vs `Nov 22`); look ahead and absorb however
                // many the line actually carries.
                let fmtspcs = self.format.date_format.matches(' ').count();
                let dspc = if fmtspcs > 0 {
                    find_char(input, ' ')
                        .map(|pos| leading_whitespace(&input[pos..]))
                        .unwrap_or(0)
                } else {
                    0
                };
                let token = take_token(input, end, dspc.max(fmtspcs) + 1)
                    .ok_or(ParseError::TokenEmpty { spec })?;
                let dt = parse_datetime(
                    &token,
                    &self.format.date_format,
                    &self.config.timezone,
                    record.datetime,
                )
                .and_then(|dt| Some((format_date(&dt, &self.format.date_num_format)?, dt)));
                let Some((date, dt)) = dt else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.numdate = date
                    .parse()
                    .map_err(|_| ParseError::TokenInvalid { spec, token })?;
                record.date = Some(date);
                record.datetime = dt.date().and_time(record.datetime.time());
            }
            // time
            't' => {
                if record.time.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let parsed = parse_datetime(
                    &token,
                    &self.format.time_format,
                    &self.config.timezone,
                    record.datetime,
                )
                .and_then(|dt| Some((format_time(&dt)?, dt)));
                let Some((time, dt)) = parsed else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.time = Some(time);
                record.datetime = record.datetime.date().and_time(dt.time());
            }
            // date and time in a single token, usually a numeric epoch
            'x' => {
                if record.time.is_some() && record.date.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let parsed = parse_datetime(
                    &token,
                    &self.format.time_format,
                    &self.config.timezone,
                    record.datetime,
                )
                .and_then(|dt| {
                    Some((
                        format_date(&dt, &self.format.date_num_format)?,
                        format_time(&dt)?,
                        dt,
                    ))
                });
                let Some((date, time, dt)) = parsed else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.numdate = date
                    .parse()
                    .map_err(|_| ParseError::TokenInvalid { spec, token })?;
                record.date = Some(date);
                record.time = Some(time);
                record.datetime = dt;
            }
            // virtual host
            'v' => {
                if record.vhost.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.vhost = Some(token);
            }
            // remote user
            'e' => {
                if record.userid.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.userid = Some(token);
            }
            // cache status; unknown tokens are discarded, not errors
            'C' => {
                if record.cache_status.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                if is_cache_status(&token) {
                    record.cache_status = Some(token);
                }
            }
            // client host
            'h' => {
                if record.host.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                // RFC 3986 allows a bracketed IPv6 host.
                let mut end = end;
                if input.starts_with('[') {
                    advance_one(input);
                    if !input.is_empty() {
                        end = "]";
                    }
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                if !self.config.no_ip_validation {
                    let kind = classify_ip(&token);
                    if kind == IpKind::Invalid {
                        return Err(ParseError::TokenInvalid { spec, token });
                    }
                    record.ip_kind = kind;
                } else if token.is_empty() {
                    return Err(ParseError::TokenInvalid { spec, token });
                }
                record.host = Some(token);
            }
            // request method
            'm' => {
                if record.method.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let Some(method) = extract_method(&token) else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.method = Some(method.to_owned());
            }
            // request path, no method or protocol
            'U' => {
                if record.request.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token = take_token(input, end, 1)
                    .filter(|t| !t.is_empty())
                    .ok_or(ParseError::TokenEmpty { spec })?;
                let Some(request) = decode_url(&token, double_decode) else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.request = Some(request);
            }
            // query string, optional
            'q' => {
                if record.query_string.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let Some(token) = take_token(input, end, 1).filter(|t| !t.is_empty()) else {
                    return Ok(());
                };
                let Some(query) = decode_url(&token, double_decode) else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.query_string = Some(query);
            }
            // request protocol
            'H' => {
                if record.protocol.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let Some(protocol) = extract_protocol(&token) else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.protocol = Some(protocol.to_owned());
            }
            // full request line, method and protocol included
            'r' => {
                if record.request.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.request = Some(self.parse_request_line(&token, record));
            }
            // status code
            's' => {
                if record.status >= 0 {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let status = token.parse::<i32>().ok().filter(|&code| {
                    (0..=599).contains(&code)
                        && (self.config.no_strict_status || is_valid_status(code))
                });
                let Some(status) = status else {
                    return Err(ParseError::TokenInvalid { spec, token });
                };
                record.status = status;
            }
            // response size in bytes, excluding headers
            'b' => {
                if record.response_size != 0 {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.response_size = token.parse().unwrap_or(0);
                self.bandwidth_seen.store(true, Ordering::Relaxed);
            }
            // referrer
            'R' => {
                if record.referrer.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token = take_token(input, end, 1)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "-".to_owned());
                if token != "-" {
                    if let Some(phrase) = self.extract_keyphrase(&token) {
                        record.keyphrase = Some(phrase);
                    }
                    if let Some(site) = extract_referrer_site(&token) {
                        record.set_referrer_site(&site);
                    }
                }
                record.referrer = Some(token);
            }
            // user agent
            'u' => {
                if record.user_agent.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                match take_token(input, end, 1) {
                    // CloudFront URL-encodes the agent, so decode it here
                    Some(token) if !token.is_empty() => {
                        record.user_agent = decode_url(&token, double_decode);
                    }
                    _ => record.user_agent = Some("-".to_owned()),
                }
            }
            // serve time in milliseconds
            'L' => {
                if record.serve_time_us != 0 {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let millis: u64 = token.parse().unwrap_or(0);
                record.serve_time_us = millis.saturating_mul(1_000);
                self.serve_time_seen.store(true, Ordering::Relaxed);
            }
            // serve time in seconds, possibly fractional
            'T' => {
                if record.serve_time_us != 0 {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let secs: f64 = if token.contains('.') {
                    token.parse().unwrap_or(0.0)
                } else {
                    token.parse::<u64>().unwrap_or(0) as f64
                };
                record.serve_time_us = if secs > 0.0 {
                    (secs * 1_000_000.0) as u64
                } else {
                    0
                };
                self.serve_time_seen.store(true, Ordering::Relaxed);
            }
            // serve time in microseconds
            'D' => {
                if record.serve_time_us != 0 {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.serve_time_us = token.parse().unwrap_or(0);
                self.serve_time_seen.store(true, Ordering::Relaxed);
            }
            // serve time in nanoseconds
            'n' => {
                if record.serve_time_us != 0 {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                let nanos: u64 = token.parse().unwrap_or(0);
                record.serve_time_us = nanos / 1_000;
                self.serve_time_seen.store(true, Ordering::Relaxed);
            }
            // TLS cipher suite, e.g. ECDHE-RSA-AES128-GCM-SHA256
            'k' => {
                if record.tls_cipher.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.tls_cipher = Some(token);
            }
            // TLS protocol version, e.g. TLSv1.2
            'K' => {
                if record.tls_version.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.tls_version = Some(token);
            }
            // MIME type, e.g. text/html
            'M' => {
                if record.mime_type.is_some() {
                    return Ok(skip_to_delim(input, end));
                }
                let token =
                    take_token(input, end, 1).ok_or(ParseError::TokenEmpty { spec })?;
                record.mime_type = Some(token);
            }
            // absorb whitespace
            '~' => skip_whitespace(input),
            // anything else: skip through the delimiter
            _ => skip_to_delim(input, end),
        }

        Ok(())
    }

    /// Split a request line into URL, method and protocol.
    ///
    /// Without a recognizable method the whole line is the request. With one
    /// but no parseable protocol/URL, the literal `-` is stored instead.
    fn parse_request_line(&self, line: &str, record: &mut LogRecord) -> String {
        let double_decode = self.config.double_decode;

        let Some(method) = extract_method(line) else {
            let request = line.to_owned();
            return match decode_url(&request, double_decode) {
                Some(decoded) if !decoded.is_empty() => decoded,
                _ => request,
            };
        };

        let rest = &line[method.len()..];
        let Some(space) = rest.rfind(' ') else {
            return "-".to_owned();
        };
        let Some(protocol) = extract_protocol(&rest[space + 1..]) else {
            return "-".to_owned();
        };
        if space == 0 {
            return "-".to_owned();
        }
        let request = rest[1..=space].to_owned();

        if self.config.append_method {
            record.method = Some(method.to_owned());
        }
        if self.config.append_protocol {
            record.protocol = Some(protocol.to_owned());
        }

        match decode_url(&request, double_decode) {
            Some(decoded) if !decoded.is_empty() => decoded,
            _ => request,
        }
    }

    fn special_specifier(
        &self,
        record: &mut LogRecord,
        input: &mut &str,
        fmt: &[char],
        i: &mut usize,
    ) -> Result<(), ParseError> {
        match fmt.get(*i).copied() {
            Some('h') => self.find_xff_host(record, input, fmt, i),
            _ => Ok(()),
        }
    }

    /// Handle `~h{...}`: scan a forwarded-for field, splitting on the
    /// braced reject set, until a token classifies as a valid IP.
    fn find_xff_host(
        &self,
        record: &mut LogRecord,
        input: &mut &str,
        fmt: &[char],
        i: &mut usize,
    ) -> Result<(), ParseError> {
        let skips =
            extract_braces(fmt, i).ok_or(ParseError::BracesMissing { spec: 'h' })?;

        // A template character after the braces that is not itself in the
        // reject set bounds the field; otherwise scan to the end of input.
        let failed = match fmt.get(*i).copied() {
            Some(delim) if !skips.contains(delim) && input.contains(delim) => {
                let delim_set = delim.to_string();
                match take_token(input, &delim_set, 1) {
                    Some(field) => {
                        let failed = self.set_xff_host(record, &field, &skips, true);
                        advance_one(input);
                        failed
                    }
                    None => false,
                }
            }
            _ => {
                let field = *input;
                self.set_xff_host(record, field, &skips, false)
            }
        };

        if failed {
            return Err(ParseError::TokenEmpty { spec: 'h' });
        }
        Ok(())
    }

    /// Walk the forwarded-for chain; the first sub-token that is a valid IP
    /// becomes the host. Returns whether no host was found.
    fn set_xff_host(
        &self,
        record: &mut LogRecord,
        field: &str,
        skips: &str,
        bounded: bool,
    ) -> bool {
        let skips_len = skips.chars().count();
        let mut s = field;
        let mut idx = 0;

        while !s.is_empty() {
            let len = s.find(|c| skips.contains(c)).unwrap_or(s.len());
            if len == 0 {
                advance_one(&mut s);
                idx += 1;
                continue;
            }
            // Fewer consecutive delimiters than the reject set holds while
            // already owning a host means the chain ended.
            if idx < skips_len && record.host.is_some() {
                break;
            }

            let token = trim_ascii(&s[..len]);
            let kind = classify_ip(token);
            if record.host.is_some() && kind == IpKind::Invalid {
                break;
            }
            if record.host.is_none() && kind != IpKind::Invalid {
                record.host = Some(token.to_owned());
                record.ip_kind = kind;
            }
            idx = 0;

            if record.host.is_some() && bounded {
                break;
            }
            s = &s[len..];
        }

        record.host.is_none()
    }

    /// Pull the search keyphrase out of a Google search, cache or translate
    /// referrer. Failures stay silent; the referrer itself is unaffected.
    fn extract_keyphrase(&self, referrer: &str) -> Option<String> {
        if !GOOGLE_HOSTS.iter().any(|host| referrer.contains(host)) {
            return None;
        }
        if referrer.contains("/+&") {
            return None;
        }

        let (rest, encoded) = if let Some(pos) = referrer.find("/+") {
            (&referrer[pos + 2..], false)
        } else if let Some(pos) = referrer.find("q=cache:") {
            let r = &referrer[pos..];
            match find_char(r, '+') {
                Some(plus) => (&r[plus + 1..], false),
                None => (r, false),
            }
        } else if let Some(pos) = referrer.find("&q=").or_else(|| referrer.find("?q=")) {
            (&referrer[pos + 3..], false)
        } else if let Some(pos) = referrer
            .find("%26q%3D")
            .or_else(|| referrer.find("%3Fq%3D"))
        {
            (&referrer[pos + 7..], true)
        } else {
            return None;
        };

        let rest = match if encoded {
            rest.find("%26")
        } else {
            find_char(rest, '&')
        } {
            Some(cut) => &rest[..cut],
            None => rest,
        };

        let decoded = decode_url(rest, self.config.double_decode)?;
        if decoded.is_empty() {
            return None;
        }
        let phrase = decoded.replace('+', " ");
        Some(trim_ascii(&phrase).to_owned())
    }
}

/// Advance the cursor to the next occurrence of the delimiter so a repeated
/// specifier passes over its field. Without a delimiter the rest of the
/// input is consumed.
fn skip_to_delim(input: &mut &str, end: &str) {
    match end.chars().next() {
        None => *input = "",
        Some(delim) => {
            if let Some(pos) = find_char(input, delim) {
                *input = &input[pos..];
            }
        }
    }
}

/// Host portion of a referrer URI, e.g. `//www.example.com/path` yields
/// `www.example.com`.
fn extract_referrer_site(referrer: &str) -> Option<String> {
    let pos = referrer.find("//")?;
    let begin = &referrer[pos + 2..];
    if begin.is_empty() {
        return None;
    }
    let len = begin.find(['/', '?']).unwrap_or(begin.len());
    if len == 0 {
        return None;
    }
    Some(begin[..len].to_owned())
}

/// Extract the reject set between unescaped braces and advance the template
/// index past the closing brace.
fn extract_braces(fmt: &[char], i: &mut usize) -> Option<String> {
    let mut open = None;
    let mut close = None;
    let mut esc = false;

    let mut j = *i;
    while j < fmt.len() {
        let c = fmt[j];
        if c == '\\' {
            esc = true;
        } else if c == '{' && !esc {
            open = Some(j);
        } else if c == '}' && !esc {
            close = Some(j);
            break;
        } else {
            esc = false;
        }
        j += 1;
    }

    let (open, close) = (open?, close?);
    if close <= open + 1 {
        return None;
    }
    let set: String = fmt[open + 1..close].iter().collect();
    *i = close + 1;
    Some(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(template: &str) -> AccessLogParser {
        let mut config = ParserConfig::new(template);
        config.date_format = "%d/%b/%Y".to_owned();
        config.time_format = "%H:%M:%S".to_owned();
        AccessLogParser::new(config).unwrap()
    }

    fn run(parser: &AccessLogParser, template: &str, line: &str) -> LogRecord {
        let mut record = LogRecord::default();
        parser.run_template(&mut record, line, template).unwrap();
        record
    }

    #[test]
    fn xff_unbounded_takes_first_valid_ip() {
        let p = parser("~h{, }");
        let record = run(&p, "~h{, }", "10.0.0.1, 192.168.1.1, 203.0.113.5");
        assert_eq!(record.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.ip_kind, IpKind::V4);
    }

    #[test]
    fn xff_skips_leading_garbage() {
        let p = parser("~h{, }");
        let record = run(&p, "~h{, }", "unknown, 203.0.113.5, 10.0.0.1");
        assert_eq!(record.host.as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn xff_bounded_by_hard_delimiter() {
        let p = parser("~h{,} %U");
        let mut record = LogRecord::default();
        p.run_template(&mut record, "10.0.0.1,192.168.1.1 /index.html", "~h{,} %U")
            .unwrap();
        assert_eq!(record.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.request.as_deref(), Some("/index.html"));
    }

    #[test]
    fn xff_without_braces_errors() {
        let p = parser("~h %U");
        let mut record = LogRecord::default();
        let err = p
            .run_template(&mut record, "10.0.0.1 /x", "~h %U")
            .unwrap_err();
        assert_eq!(err, ParseError::BracesMissing { spec: 'h' });
    }

    #[test]
    fn xff_no_valid_ip_errors() {
        let p = parser("~h{, }");
        let mut record = LogRecord::default();
        let err = p
            .run_template(&mut record, "unknown, not-an-ip", "~h{, }")
            .unwrap_err();
        assert_eq!(err, ParseError::TokenEmpty { spec: 'h' });
    }

    #[test]
    fn specifier_once_first_occurrence_wins() {
        let p = parser("%e %e");
        let record = run(&p, "%e %e", "alice bob");
        assert_eq!(record.userid.as_deref(), Some("alice"));
    }

    #[test]
    fn request_line_without_method_keeps_whole_line() {
        let p = parser("\"%r\"");
        let record = run(&p, "\"%r\"", "\"BREW /teapot HTTP/1.1\"");
        assert_eq!(record.request.as_deref(), Some("BREW /teapot HTTP/1.1"));
        assert!(record.method.is_none());
        assert!(record.protocol.is_none());
    }

    #[test]
    fn request_line_without_protocol_stores_dash() {
        let p = parser("\"%r\"");
        let record = run(&p, "\"%r\"", "\"GET /index.html\"");
        assert_eq!(record.request.as_deref(), Some("-"));
    }

    #[test]
    fn request_line_split() {
        let p = parser("\"%r\"");
        let record = run(&p, "\"%r\"", "\"GET /a%20b?x=1 HTTP/1.1\"");
        assert_eq!(record.request.as_deref(), Some("/a b?x=1"));
        assert_eq!(record.method.as_deref(), Some("GET"));
        assert_eq!(record.protocol.as_deref(), Some("HTTP/1.1"));
    }

    #[test]
    fn request_line_append_flags_off() {
        let mut config = ParserConfig::new("\"%r\"");
        config.date_format = "%d/%b/%Y".to_owned();
        config.time_format = "%H:%M:%S".to_owned();
        config.append_method = false;
        config.append_protocol = false;
        let p = AccessLogParser::new(config).unwrap();
        let record = run(&p, "\"%r\"", "\"GET / HTTP/1.1\"");
        assert_eq!(record.request.as_deref(), Some("/"));
        assert!(record.method.is_none());
        assert!(record.protocol.is_none());
    }

    #[test]
    fn serve_time_normalizes_to_microseconds() {
        for (template, line, expected) in [
            ("%L", "250", 250_000),
            ("%T", "1.5", 1_500_000),
            ("%T", "2", 2_000_000),
            ("%D", "750", 750),
            ("%n", "5000", 5),
        ] {
            let p = parser(template);
            let record = run(&p, template, line);
            assert_eq!(record.serve_time_us, expected, "template {template}");
            assert!(p.serve_time_seen());
        }
    }

    #[test]
    fn unparseable_sizes_and_times_become_zero() {
        let p = parser("%b");
        let record = run(&p, "%b", "-");
        assert_eq!(record.response_size, 0);
        assert!(p.bandwidth_seen());

        let p = parser("%L");
        let record = run(&p, "%L", "fast");
        assert_eq!(record.serve_time_us, 0);
    }

    #[test]
    fn cache_status_outside_whitelist_is_dropped() {
        let p = parser("%C %e");
        let record = run(&p, "%C %e", "FRESH bob");
        assert!(record.cache_status.is_none());
        assert_eq!(record.userid.as_deref(), Some("bob"));

        let record = run(&p, "%C %e", "hit bob");
        assert_eq!(record.cache_status.as_deref(), Some("hit"));
    }

    #[test]
    fn padded_syslog_dates_absorb_extra_whitespace() {
        let mut config = ParserConfig::new("%d %e");
        config.date_format = "%b %e".to_owned();
        config.time_format = "%H:%M:%S".to_owned();
        let p = AccessLogParser::new(config).unwrap();

        let record = run(&p, "%d %e", "Dec  2 carol");
        assert_eq!(record.date.as_deref(), Some("20001202"));
        assert_eq!(record.userid.as_deref(), Some("carol"));

        let record = run(&p, "%d %e", "Nov 22 carol");
        assert_eq!(record.date.as_deref(), Some("20001122"));
        assert_eq!(record.userid.as_deref(), Some("carol"));
    }

    #[test]
    fn whitespace_absorb_specifier() {
        let p = parser("%~%e");
        let record = run(&p, "%~%e", "   carol");
        assert_eq!(record.userid.as_deref(), Some("carol"));
    }

    #[test]
    fn keyphrase_from_google_search() {
        let p = parser("%R");
        let phrase = p
            .extract_keyphrase("https://www.google.com/search?q=hello+world&ie=UTF-8")
            .unwrap();
        assert_eq!(phrase, "hello world");
    }

    #[test]
    fn keyphrase_from_encoded_query() {
        let p = parser("%R");
        let phrase = p
            .extract_keyphrase("https://www.google.com/url%3Fq%3Drust%2Bparser%26sa=t")
            .unwrap();
        assert_eq!(phrase, "rust parser");
    }

    #[test]
    fn keyphrase_ignores_non_search_referrers() {
        let p = parser("%R");
        assert!(p.extract_keyphrase("https://example.com/?q=nope").is_none());
        assert!(p
            .extract_keyphrase("https://www.google.com/maps/place/x")
            .is_none());
    }

    #[test]
    fn referrer_site_extraction() {
        assert_eq!(
            extract_referrer_site("https://www.example.com/path?x=1").as_deref(),
            Some("www.example.com")
        );
        assert_eq!(
            extract_referrer_site("//cdn.example.net").as_deref(),
            Some("cdn.example.net")
        );
        assert_eq!(extract_referrer_site("no-scheme-here"), None);
    }

    #[test]
    fn braces_extraction() {
        let fmt: Vec<char> = "h{, } ".chars().collect();
        let mut i = 0;
        assert_eq!(extract_braces(&fmt, &mut i).as_deref(), Some(", "));
        assert_eq!(fmt[i], ' ');

        let fmt: Vec<char> = "h{}".chars().collect();
        let mut i = 0;
        assert_eq!(extract_braces(&fmt, &mut i), None);
    }
}
