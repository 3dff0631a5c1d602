//! Combined-format access log for forward-auth requests.
//!
//! One line per request on the `crowdgate::access` target. The request being
//! authorized is described by the proxy's `X-Forwarded-*` headers, not by the
//! forward-auth call itself.

use chrono::{DateTime, Local};
use http::{HeaderMap, HeaderName, StatusCode, Version, header};
use regex::Regex;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

const FORWARDED_METHOD: HeaderName = HeaderName::from_static("x-forwarded-method");
const FORWARDED_URI: HeaderName = HeaderName::from_static("x-forwarded-uri");
const FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// First email-like token in the `Cookie` header names the user.
static USER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w\-\.]+@([\w\-]+\.)+[\w\-]{2,4}").expect("user pattern is valid")
});

/// Fields of one access log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub ip: String,
    pub user: String,
    pub method: String,
    pub uri: String,
    pub proto: String,
    pub status: u16,
    pub length: u64,
    pub user_agent: String,
    pub request_number: u64,
    pub country: String,
    pub host: String,
    pub elapsed_ms: u64,
}

impl AccessEntry {
    /// Render in combined log format with the trailing counter, country,
    /// and latency columns.
    pub fn line(&self, at: DateTime<Local>) -> String {
        format!(
            "{} - {} [{}] \"{} {} {}\" {} {} \"-\" \"{}\" {} \"{}@{}\" \"-\" {}ms",
            self.ip,
            self.user,
            at.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.uri,
            self.proto,
            self.status,
            self.length,
            self.user_agent,
            self.request_number,
            self.country,
            self.host,
            self.elapsed_ms,
        )
    }
}

/// Emits access log lines and numbers the requests it has seen.
#[derive(Debug)]
pub struct AccessLog {
    country_header: Option<HeaderName>,
    requests: AtomicU64,
}

impl AccessLog {
    pub fn new(country_header: Option<HeaderName>) -> Self {
        Self {
            country_header,
            requests: AtomicU64::new(0),
        }
    }

    /// Requests logged so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Build the entry for a request; each call takes the next request number.
    pub fn entry(
        &self,
        ip: &str,
        headers: &HeaderMap,
        version: Version,
        status: StatusCode,
        elapsed: Duration,
    ) -> AccessEntry {
        let request_number = self.requests.fetch_add(1, Ordering::Relaxed) + 1;

        let user = header_str(headers, &header::COOKIE)
            .and_then(|cookie| USER_PATTERN.find(cookie))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        let country = self
            .country_header
            .as_ref()
            .and_then(|name| header_str(headers, name))
            .filter(|c| !c.is_empty())
            .unwrap_or("unknown");
        let length = header_str(headers, &header::CONTENT_LENGTH)
            .and_then(|l| l.parse().ok())
            .unwrap_or(0);

        AccessEntry {
            ip: ip.to_string(),
            user,
            method: header_str(headers, &FORWARDED_METHOD).unwrap_or("").to_string(),
            uri: header_str(headers, &FORWARDED_URI).unwrap_or("").to_string(),
            proto: format!("{version:?}"),
            status: status.as_u16(),
            length,
            user_agent: header_str(headers, &header::USER_AGENT)
                .filter(|ua| !ua.is_empty())
                .unwrap_or("-")
                .to_string(),
            request_number,
            country: country.to_string(),
            host: header_str(headers, &FORWARDED_HOST).unwrap_or("").to_string(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Log one request.
    pub fn record(
        &self,
        ip: &str,
        headers: &HeaderMap,
        version: Version,
        status: StatusCode,
        elapsed: Duration,
    ) {
        let entry = self.entry(ip, headers, version, status, elapsed);
        info!(
            target: "crowdgate::access",
            ip = %entry.ip,
            user = %entry.user,
            method = %entry.method,
            uri = %entry.uri,
            proto = %entry.proto,
            status = entry.status,
            length = entry.length,
            user_agent = %entry.user_agent,
            request = entry.request_number,
            country = %entry.country,
            host = %entry.host,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.line(Local::now())
        );
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use http::HeaderValue;

    fn log() -> AccessLog {
        AccessLog::new(Some(HeaderName::from_static("cf-ipcountry")))
    }

    #[test]
    fn test_entry_from_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-method", HeaderValue::from_static("POST"));
        headers.insert("x-forwarded-uri", HeaderValue::from_static("/login?next=/"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("app.example.com"));
        headers.insert("cf-ipcountry", HeaderValue::from_static("BR"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        headers.insert(
            "cookie",
            HeaderValue::from_static("session=abc; who=jane.doe@mail.example.org; x=1"),
        );

        let entry = log().entry(
            "1.2.3.4",
            &headers,
            Version::HTTP_11,
            StatusCode::FORBIDDEN,
            Duration::from_millis(12),
        );
        assert_eq!(entry.user, "jane.doe@mail.example.org");
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.uri, "/login?next=/");
        assert_eq!(entry.proto, "HTTP/1.1");
        assert_eq!(entry.status, 403);
        assert_eq!(entry.country, "BR");
        assert_eq!(entry.host, "app.example.com");
        assert_eq!(entry.request_number, 1);
    }

    #[test]
    fn test_missing_headers_use_placeholders() {
        let entry = log().entry(
            "1.2.3.4",
            &HeaderMap::new(),
            Version::HTTP_11,
            StatusCode::OK,
            Duration::ZERO,
        );
        assert_eq!(entry.user, "-");
        assert_eq!(entry.user_agent, "-");
        assert_eq!(entry.country, "unknown");
        assert_eq!(entry.length, 0);

        let no_country_header = AccessLog::new(None).entry(
            "1.2.3.4",
            &HeaderMap::new(),
            Version::HTTP_2,
            StatusCode::OK,
            Duration::ZERO,
        );
        assert_eq!(no_country_header.country, "unknown");
        assert_eq!(no_country_header.proto, "HTTP/2.0");
    }

    #[test]
    fn test_request_counter_increments() {
        let log = log();
        for expected in 1..=3 {
            let entry = log.entry(
                "1.2.3.4",
                &HeaderMap::new(),
                Version::HTTP_11,
                StatusCode::OK,
                Duration::ZERO,
            );
            assert_eq!(entry.request_number, expected);
        }
        assert_eq!(log.requests(), 3);
    }

    #[test]
    fn test_line_format() {
        let entry = AccessEntry {
            ip: "1.2.3.4".to_string(),
            user: "-".to_string(),
            method: "GET".to_string(),
            uri: "/".to_string(),
            proto: "HTTP/1.1".to_string(),
            status: 200,
            length: 0,
            user_agent: "Mozilla/5.0".to_string(),
            request_number: 7,
            country: "US".to_string(),
            host: "example.com".to_string(),
            elapsed_ms: 3,
        };
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap();
        let line = entry.line(at);
        let stamp = at.format("%z").to_string();
        assert_eq!(
            line,
            format!(
                "1.2.3.4 - - [09/Mar/2024:14:05:06 {stamp}] \"GET / HTTP/1.1\" 200 0 \"-\" \"Mozilla/5.0\" 7 \"US@example.com\" \"-\" 3ms"
            )
        );
    }
}
