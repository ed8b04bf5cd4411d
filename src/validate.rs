//! Token validators: client IPs, HTTP methods and protocols, status codes
//! and cache statuses.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::record::IpKind;

/// HTTP methods accepted by `%m` and by request-line splitting, including the
/// WebDAV and DeltaV sets. Matching is a case-insensitive prefix match and
/// the canonical (uppercase) entry is what gets stored.
const HTTP_METHODS: &[&str] = &[
    "OPTIONS",
    "GET",
    "HEAD",
    "POST",
    "PUT",
    "DELETE",
    "TRACE",
    "CONNECT",
    "PATCH",
    "SEARCH",
    // WebDAV
    "PROPFIND",
    "PROPPATCH",
    "MKCOL",
    "COPY",
    "MOVE",
    "LOCK",
    "UNLOCK",
    "VERSION-CONTROL",
    "REPORT",
    "CHECKOUT",
    "CHECKIN",
    "UNCHECKOUT",
    "MKWORKSPACE",
    "UPDATE",
    "LABEL",
    "MERGE",
    "BASELINE-CONTROL",
    "MKACTIVITY",
    "ORDERPATCH",
];

const HTTP_PROTOCOLS: &[&str] = &["HTTP/1.0", "HTTP/1.1", "HTTP/2", "HTTP/3"];

const CACHE_STATUSES: &[&str] = &[
    "MISS",
    "BYPASS",
    "EXPIRED",
    "STALE",
    "UPDATING",
    "REVALIDATED",
    "HIT",
];

/// HTTP status code categories, indexed by the century digit.
const STATUS_CATEGORIES: [&str; 6] = [
    "0xx Unofficial Codes",
    "1xx Informational",
    "2xx Success",
    "3xx Redirection",
    "4xx Client Errors",
    "5xx Server Errors",
];

/// Registered HTTP status codes and their descriptions, sorted by code.
const STATUS_CODES: &[(u16, &str)] = &[
    (0, "0 - Caddy: Unhandled - No configured routes"),
    (100, "100 - Continue: Server received the initial part of the request"),
    (101, "101 - Switching Protocols: Client asked to switch protocols"),
    (200, "200 - OK: The request sent by the client was successful"),
    (201, "201 - Created: The request has been fulfilled and created"),
    (202, "202 - Accepted: The request has been accepted for processing"),
    (203, "203 - Non-authoritative Information: Response from a third party"),
    (204, "204 - No Content: Request did not return any content"),
    (205, "205 - Reset Content: Server asked the client to reset the document"),
    (206, "206 - Partial Content: The partial GET has been successful"),
    (207, "207 - Multi-Status: WebDAV; RFC 4918"),
    (208, "208 - Already Reported: WebDAV; RFC 5842"),
    (218, "218 - This is fine: Apache servers. A catch-all error condition"),
    (300, "300 - Multiple Choices: Multiple options for the resource"),
    (301, "301 - Moved Permanently: Resource has permanently moved"),
    (302, "302 - Moved Temporarily (redirect)"),
    (303, "303 - See Other Document: The response is at a different URI"),
    (304, "304 - Not Modified: Resource has not been modified"),
    (305, "305 - Use Proxy: Can only be accessed through the proxy"),
    (307, "307 - Temporary Redirect: Resource temporarily moved"),
    (308, "308 - Permanent Redirect"),
    (400, "400 - Bad Request: The syntax of the request is invalid"),
    (401, "401 - Unauthorized: Request needs user authentication"),
    (402, "402 - Payment Required"),
    (403, "403 - Forbidden: Server is refusing to respond to it"),
    (404, "404 - Not Found: Requested resource could not be found"),
    (405, "405 - Method Not Allowed: Request method not supported"),
    (406, "406 - Not Acceptable"),
    (407, "407 - Proxy Authentication Required"),
    (408, "408 - Request Timeout: Server timed out waiting for the request"),
    (409, "409 - Conflict: Conflict in the request"),
    (410, "410 - Gone: Resource requested is no longer available"),
    (411, "411 - Length Required: Invalid Content-Length"),
    (412, "412 - Precondition Failed: Server does not meet preconditions"),
    (413, "413 - Payload Too Large"),
    (414, "414 - Request-URI Too Long"),
    (415, "415 - Unsupported Media Type: Media type is not supported"),
    (416, "416 - Requested Range Not Satisfiable: Cannot supply that portion"),
    (417, "417 - Expectation Failed"),
    (418, "418 - I'm a teapot"),
    (419, "419 - Page Expired: Laravel Framework when a CSRF Token is missing"),
    (420, "420 - Method Failure: Spring Framework when a method has failed"),
    (421, "421 - Misdirected Request"),
    (422, "422 - Unprocessable Entity due to semantic errors: WebDAV"),
    (423, "423 - The resource that is being accessed is locked"),
    (424, "424 - Failed Dependency: WebDAV"),
    (426, "426 - Upgrade Required: Client should switch to a different protocol"),
    (428, "428 - Precondition Required"),
    (429, "429 - Too Many Requests: The user has sent too many requests"),
    (
        430,
        "430 - Request Header Fields Too Large: Too many URLs are requested within a certain time frame",
    ),
    (431, "431 - Request Header Fields Too Large"),
    (440, "440 - Login Time-out: The client's session has expired"),
    (444, "444 - (Nginx) Connection closed without sending any headers"),
    (449, "449 - Retry With: The server cannot honour the request"),
    (
        450,
        "450 - Blocked by Windows Parental Controls: The Microsoft extension code indicated",
    ),
    (451, "451 - Unavailable For Legal Reasons"),
    (460, "460 - AWS Elastic Load Balancing: Client closed the connection "),
    (
        463,
        "463 - AWS Elastic Load Balancing: The load balancer received more than 30 IP addresses",
    ),
    (464, "464 - AWS Elastic Load Balancing: Incompatible protocol versions"),
    (494, "494 - (Nginx) Request Header Too Large"),
    (495, "495 - (Nginx) SSL client certificate error"),
    (496, "496 - (Nginx) Client didn't provide certificate"),
    (497, "497 - (Nginx) HTTP request sent to HTTPS port"),
    (498, "498 - Invalid Token: an expired or otherwise invalid token"),
    (499, "499 - (Nginx) Connection closed by client while processing request"),
    (500, "500 - Internal Server Error"),
    (501, "501 - Not Implemented"),
    (502, "502 - Bad Gateway: Received an invalid response from the upstream"),
    (503, "503 - Service Unavailable: The server is currently unavailable"),
    (504, "504 - Gateway Timeout: The upstream server failed to send request"),
    (505, "505 - HTTP Version Not Supported"),
    (509, "509 - Bandwidth Limit Exceeded: The server has exceeded the bandwidth"),
    (520, "520 - CloudFlare - Web server is returning an unknown error"),
    (521, "521 - CloudFlare - Web server is down"),
    (522, "522 - CloudFlare - Connection timed out"),
    (523, "523 - CloudFlare - Origin is unreachable"),
    (524, "524 - CloudFlare - A timeout occurred"),
    (
        525,
        "525 - SSL Handshake Failed: Cloudflare could not negotiate a SSL/TLS handshake",
    ),
    (
        526,
        "526 - Invalid SSL Certificate: Cloudflare could not validate the SSL certificate",
    ),
    (527, "527 - Railgun Error: An interrupted connection"),
    (529, "529 - Site is overloaded: A site can not process the request"),
    (530, "530 - Site is frozen: A site has been frozen due to inactivity"),
    (
        540,
        "540 - Temporarily Disabled: The requested endpoint has been temporarily disabled",
    ),
    (561, "561 - Unauthorized: An error around authentication"),
    (
        598,
        "598 - Network read timeout error: some HTTP proxies to signal a network read timeout",
    ),
    (599, "599 - Network Connect Timeout Error: An error used by some HTTP proxies"),
];

/// Classify a host token as IPv4, IPv6 or neither.
pub(crate) fn classify_ip(token: &str) -> IpKind {
    if token.is_empty() {
        return IpKind::Invalid;
    }
    if token.parse::<Ipv4Addr>().is_ok() {
        IpKind::V4
    } else if token.parse::<Ipv6Addr>().is_ok() {
        IpKind::V6
    } else {
        IpKind::Invalid
    }
}

fn prefix_matches(token: &str, candidate: &str) -> bool {
    token
        .as_bytes()
        .get(..candidate.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(candidate.as_bytes()))
}

/// Find the canonical HTTP method the token starts with.
pub(crate) fn extract_method(token: &str) -> Option<&'static str> {
    HTTP_METHODS
        .iter()
        .find(|method| prefix_matches(token, method))
        .copied()
}

/// Find the canonical HTTP protocol the token starts with.
pub(crate) fn extract_protocol(token: &str) -> Option<&'static str> {
    HTTP_PROTOCOLS
        .iter()
        .find(|protocol| prefix_matches(token, protocol))
        .copied()
}

/// Whether the token names a known cache result.
pub(crate) fn is_cache_status(token: &str) -> bool {
    CACHE_STATUSES
        .iter()
        .any(|status| token.eq_ignore_ascii_case(status))
}

/// The description registered for a status code, if any.
pub(crate) fn status_description(code: u16) -> Option<&'static str> {
    STATUS_CODES
        .binary_search_by_key(&code, |&(c, _)| c)
        .ok()
        .map(|idx| STATUS_CODES[idx].1)
}

/// Whether `code` is a registered HTTP status: in range, with a known
/// category and a known description.
pub(crate) fn is_valid_status(code: i32) -> bool {
    (0..=599).contains(&code)
        && STATUS_CATEGORIES.get((code / 100) as usize).is_some()
        && status_description(code as u16).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ip_kinds() {
        assert_eq!(classify_ip("114.5.1.4"), IpKind::V4);
        assert_eq!(classify_ip("2001:db8::1"), IpKind::V6);
        assert_eq!(classify_ip("::1"), IpKind::V6);
        assert_eq!(classify_ip("server.example.com"), IpKind::Invalid);
        assert_eq!(classify_ip("999.1.1.1"), IpKind::Invalid);
        assert_eq!(classify_ip(""), IpKind::Invalid);
    }

    #[test]
    fn methods_match_by_prefix() {
        assert_eq!(extract_method("GET"), Some("GET"));
        assert_eq!(extract_method("get /x"), Some("GET"));
        assert_eq!(extract_method("PROPFIND"), Some("PROPFIND"));
        assert_eq!(extract_method("BREW"), None);
    }

    #[test]
    fn protocols_match_by_prefix() {
        assert_eq!(extract_protocol("HTTP/1.1"), Some("HTTP/1.1"));
        assert_eq!(extract_protocol("http/2.0"), Some("HTTP/2"));
        assert_eq!(extract_protocol("SPDY/3"), None);
    }

    #[test]
    fn cache_status_whitelist() {
        assert!(is_cache_status("hit"));
        assert!(is_cache_status("REVALIDATED"));
        assert!(!is_cache_status("FRESH"));
    }

    #[test]
    fn status_codes_table_is_sorted() {
        let mut last = None;
        for &(code, _) in STATUS_CODES {
            assert!(last.map_or(true, |prev| prev < code));
            last = Some(code);
        }
    }

    #[test]
    fn status_validity() {
        assert!(is_valid_status(0));
        assert!(is_valid_status(200));
        assert!(is_valid_status(418));
        assert!(is_valid_status(599));
        assert!(!is_valid_status(306));
        assert!(!is_valid_status(600));
        assert!(!is_valid_status(999));
        assert!(!is_valid_status(-1));
    }
}
