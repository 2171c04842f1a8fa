use std::fmt::{Display, Formatter};
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::buffers::Buffers;
use crate::error::Error;
use crate::http::parser::{format_http_date, parse_http_date};
use crate::uri::Uri;

/// An HTTP protocol version, comparable as `(major, minor)` so that code can
///  write `if request.version() >= HttpVersion::HTTP_1_1 { ... }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpVersion {
    pub major: u8,
    pub minor: u8,
}

impl HttpVersion {
    pub const HTTP_1_0: HttpVersion = HttpVersion { major: 1, minor: 0 };
    pub const HTTP_1_1: HttpVersion = HttpVersion { major: 1, minor: 1 };
}

impl Display for HttpVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Byte range into the header buffer. Offsets stay valid because the header
///  buffer is append-only: field mutation appends a new line, it never moves
///  existing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub(crate) fn of<'a>(&self, buf: &'a [u8]) -> &'a str {
        std::str::from_utf8(&buf[self.start as usize..self.end as usize])
            .expect("header bytes were validated as UTF-8 when the span was recorded")
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldSpan {
    pub name: Span,
    pub value: Span,
}

/// Common part of HTTP requests and responses: the materialized header block,
///  an index of field name/value offsets into it, and an optional body.
///
/// The header buffer holds the start line and all field lines, each
///  terminated by CRLF, but *not* the blank line ending the header section;
///  [HttpMessage::marshal] supplies that. This is what makes `set_field` an
///  append.
#[derive(Debug)]
pub struct HttpMessage {
    header: BytesMut,
    fields: Vec<FieldSpan>,
    body: Option<Bytes>,
}

impl HttpMessage {
    pub(crate) fn with_start_line(line: &str) -> HttpMessage {
        let mut header = BytesMut::with_capacity(line.len() + 2 + 128);
        header.put_slice(line.as_bytes());
        header.put_slice(b"\r\n");
        HttpMessage {
            header,
            fields: Vec::new(),
            body: None,
        }
    }

    pub(crate) fn from_parsed(
        header: BytesMut,
        fields: Vec<FieldSpan>,
        body: Option<Bytes>,
    ) -> HttpMessage {
        HttpMessage {
            header,
            fields,
            body,
        }
    }

    pub(crate) fn header_bytes(&self) -> &[u8] {
        &self.header
    }

    /// Case-insensitive field lookup; returns the first matching value,
    ///  whitespace-trimmed. Linear scan: header counts are small.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.of(&self.header).eq_ignore_ascii_case(name))
            .map(|f| f.value.of(&self.header))
    }

    /// All values for a field name, for fields that may legally repeat.
    pub fn field_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name.of(&self.header).eq_ignore_ascii_case(name))
            .map(|f| f.value.of(&self.header))
    }

    /// Append a `name: value` line to the header and index it. An existing
    ///  field of the same name is not removed; lookups return the first
    ///  occurrence, so setters for singleton fields should only be called
    ///  once per message.
    pub fn set_field(&mut self, name: &str, value: &str) {
        let name_start = self.header.len() as u32;
        self.header.put_slice(name.as_bytes());
        let name_end = self.header.len() as u32;
        self.header.put_slice(b": ");
        let value_start = self.header.len() as u32;
        self.header.put_slice(value.as_bytes());
        let value_end = self.header.len() as u32;
        self.header.put_slice(b"\r\n");

        self.fields.push(FieldSpan {
            name: Span {
                start: name_start,
                end: name_end,
            },
            value: Span {
                start: value_start,
                end: value_end,
            },
        });
    }

    pub fn set_time_field(&mut self, name: &str, value: DateTime<Utc>) {
        self.set_field(name, &format_http_date(value));
    }

    /// Parse a field as an HTTP date (RFC 1123, RFC 850 or asctime format).
    pub fn time_field(&self, name: &str) -> Option<Result<DateTime<Utc>, Error>> {
        self.field(name).map(parse_http_date)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    pub(crate) fn set_body_raw(&mut self, body: Bytes) {
        self.body = Some(body);
    }

    pub(crate) fn into_parts(self) -> (BytesMut, Vec<FieldSpan>) {
        (self.header, self.fields)
    }

    /// Header (with terminating blank line) followed by the body, if any.
    ///  The body buffer is passed through without copying.
    pub fn marshal(&self) -> Buffers {
        let mut header = BytesMut::with_capacity(self.header.len() + 2);
        header.put_slice(&self.header);
        header.put_slice(b"\r\n");

        let mut buffers = Buffers::with_capacity(2);
        buffers.push(header.freeze());
        if let Some(body) = &self.body {
            buffers.push(body.clone());
        }
        buffers
    }
}

/// An HTTP/1.1 request. Construction materializes the request line; parsing
///  records offsets into the received header block instead of copying pieces
///  out of it.
#[derive(Debug)]
pub struct HttpRequest {
    message: HttpMessage,
    method: Span,
    target: Span,
    version: HttpVersion,
    parsed_uri: Option<Uri>,
    /// For latency measurement.
    created_at: Instant,
    /// Wall-clock creation time, for access logging.
    created_wall: DateTime<Utc>,
}

impl HttpRequest {
    pub fn new(method: &str, target: &str) -> HttpRequest {
        let line = format!("{} {} HTTP/1.1", method, target);
        let message = HttpMessage::with_start_line(&line);
        HttpRequest {
            method: Span {
                start: 0,
                end: method.len() as u32,
            },
            target: Span {
                start: method.len() as u32 + 1,
                end: (method.len() + 1 + target.len()) as u32,
            },
            version: HttpVersion::HTTP_1_1,
            message,
            parsed_uri: None,
            created_at: Instant::now(),
            created_wall: Utc::now(),
        }
    }

    /// Build a request addressed by a [Uri]: the request target is the URI's
    ///  resource (plus query, if any) and a `Host` field is set.
    pub fn for_uri(method: &str, uri: &Uri) -> HttpRequest {
        let mut target = uri.resource().to_owned();
        for (i, (key, value)) in uri.query().iter().enumerate() {
            target.push(if i == 0 { '?' } else { '&' });
            target.push_str(key);
            target.push('=');
            target.push_str(value);
        }

        let mut request = HttpRequest::new(method, &target);
        let host = if uri.port() != 0 {
            format!("{}:{}", uri.host(), uri.port())
        } else {
            uri.host().to_owned()
        };
        request.set_field("Host", &host);
        request
    }

    pub(crate) fn from_parsed(
        message: HttpMessage,
        method: Span,
        target: Span,
        version: HttpVersion,
    ) -> HttpRequest {
        HttpRequest {
            message,
            method,
            target,
            version,
            parsed_uri: None,
            created_at: Instant::now(),
            created_wall: Utc::now(),
        }
    }

    pub fn method(&self) -> &str {
        self.method.of(self.message.header_bytes())
    }

    /// The request target exactly as it appears on the request line.
    pub fn target(&self) -> &str {
        self.target.of(self.message.header_bytes())
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn created_wall(&self) -> DateTime<Utc> {
        self.created_wall
    }

    /// The request target parsed as a URI, computed on first use. Only
    ///  meaningful for absolute-form targets.
    pub fn parsed_uri(&mut self) -> Result<&Uri, Error> {
        if self.parsed_uri.is_none() {
            let target = self.target().to_owned();
            self.parsed_uri = Some(Uri::parse(&target)?);
        }
        Ok(self
            .parsed_uri
            .as_ref()
            .expect("just initialized above"))
    }

    /// Attach a body and the matching `Content-Length` field.
    pub fn set_body(&mut self, body: Bytes) {
        self.set_field("Content-Length", &body.len().to_string());
        self.message.set_body_raw(body);
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.message.field(name)
    }

    pub fn set_field(&mut self, name: &str, value: &str) {
        self.message.set_field(name, value)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.message.body()
    }

    pub fn message(&self) -> &HttpMessage {
        &self.message
    }

    pub fn marshal(&self) -> Buffers {
        self.message.marshal()
    }
}

/// An HTTP/1.1 response.
#[derive(Debug)]
pub struct HttpResponse {
    message: HttpMessage,
    status_code: u16,
    version: HttpVersion,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> HttpResponse {
        debug_assert!((100..=599).contains(&status_code));
        let line = format!(
            "HTTP/1.1 {} {}",
            status_code,
            reason_phrase(status_code)
        );
        HttpResponse {
            message: HttpMessage::with_start_line(&line),
            status_code,
            version: HttpVersion::HTTP_1_1,
        }
    }

    /// A response with a body and matching `Content-Length`.
    pub fn with_body(status_code: u16, body: Bytes) -> HttpResponse {
        let mut response = HttpResponse::new(status_code);
        response.set_body(body);
        response
    }

    pub(crate) fn from_parsed(
        message: HttpMessage,
        status_code: u16,
        version: HttpVersion,
    ) -> HttpResponse {
        HttpResponse {
            message,
            status_code,
            version,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.set_field("Content-Length", &body.len().to_string());
        self.message.set_body_raw(body);
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.message.field(name)
    }

    pub fn set_field(&mut self, name: &str, value: &str) {
        self.message.set_field(name, value)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.message.body()
    }

    pub fn body_len(&self) -> usize {
        self.message.body_len()
    }

    pub fn message(&self) -> &HttpMessage {
        &self.message
    }

    pub fn marshal(&self) -> Buffers {
        self.message.marshal()
    }
}

pub(crate) fn reason_phrase(status_code: u16) -> &'static str {
    match status_code {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_request_line_and_marshal() {
        let mut request = HttpRequest::new("GET", "/");
        request.set_field("Host", "x");

        assert_eq!(request.method(), "GET");
        assert_eq!(request.target(), "/");
        assert_eq!(request.version(), HttpVersion::HTTP_1_1);

        let wire = request.marshal().to_bytes();
        assert_eq!(wire.as_ref(), b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    }

    #[test]
    fn test_body_sets_content_length() {
        let mut request = HttpRequest::new("PUT", "/file");
        request.set_body(Bytes::from_static(b"hello"));

        assert_eq!(request.field("Content-Length"), Some("5"));
        let wire = request.marshal().to_bytes();
        assert!(wire.ends_with(b"\r\n\r\nhello"));
    }

    #[rstest]
    #[case::same_case("Content-Length", "Content-Length")]
    #[case::lower("content-length", "Content-Length")]
    #[case::wild("cOnTeNt-LeNgTh", "Content-Length")]
    fn test_field_lookup_case_insensitive(#[case] lookup: &str, #[case] set: &str) {
        let mut response = HttpResponse::new(200);
        response.set_field(set, "5");
        assert_eq!(response.field(lookup), Some("5"));
    }

    #[test]
    fn test_field_offsets_survive_appends() {
        let mut response = HttpResponse::new(200);
        response.set_field("A", "1");
        let a_before = response.field("A").unwrap().to_owned();
        for i in 0..50 {
            response.set_field(&format!("X{}", i), "filler-value");
        }
        assert_eq!(response.field("A").unwrap(), a_before);
    }

    #[test]
    fn test_request_for_uri() {
        let uri = Uri::parse("http://example.com:8080/api?k=v").unwrap();
        let request = HttpRequest::for_uri("GET", &uri);
        assert_eq!(request.target(), "/api?k=v");
        assert_eq!(request.field("Host"), Some("example.com:8080"));
    }

    #[test]
    fn test_version_comparison() {
        assert!(HttpVersion::HTTP_1_1 > HttpVersion::HTTP_1_0);
        assert_eq!(HttpVersion::HTTP_1_1.to_string(), "1.1");
    }
}
