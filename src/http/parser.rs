use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, ParseReason};
use crate::http::message::{FieldSpan, HttpMessage, HttpRequest, HttpResponse, HttpVersion, Span};

/// Headers beyond this are rejected rather than buffered indefinitely.
const MAX_HEADER_LEN: usize = 64 * 1024;

const DEFAULT_MAX_BODY_LEN: usize = 64 * 1024 * 1024;

fn parse_err(reason: ParseReason) -> Error {
    Error::parse("http", reason)
}

/// The message-kind hook of the parser: requests and responses differ in
///  their first header line and in their body-less semantics.
pub trait HttpKind: Send {
    type Message: Send;
    type Head: Send;

    fn parse_start_line(line: &str, start_offset: u32) -> Result<Self::Head, Error>;

    /// Whether a message without `Content-Length` and without chunking reads
    ///  to connection close (responses) or has an empty body (requests).
    fn body_to_eof(head: &Self::Head) -> bool;

    fn assemble(head: Self::Head, message: HttpMessage) -> Self::Message;
}

pub struct RequestKind;

pub struct RequestHead {
    method: Span,
    target: Span,
    version: HttpVersion,
}

impl HttpKind for RequestKind {
    type Message = HttpRequest;
    type Head = RequestHead;

    fn parse_start_line(line: &str, start_offset: u32) -> Result<RequestHead, Error> {
        let mut parts = line.split(' ');
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() => (m, t, v),
            _ => return Err(parse_err(ParseReason::MalformedStartLine)),
        };

        let method_start = start_offset;
        let target_start = method_start + method.len() as u32 + 1;
        Ok(RequestHead {
            method: Span {
                start: method_start,
                end: method_start + method.len() as u32,
            },
            target: Span {
                start: target_start,
                end: target_start + target.len() as u32,
            },
            version: parse_version(version)?,
        })
    }

    fn body_to_eof(_head: &RequestHead) -> bool {
        false
    }

    fn assemble(head: RequestHead, message: HttpMessage) -> HttpRequest {
        HttpRequest::from_parsed(message, head.method, head.target, head.version)
    }
}

pub struct ResponseKind;

pub struct ResponseHead {
    status_code: u16,
    version: HttpVersion,
}

impl HttpKind for ResponseKind {
    type Message = HttpResponse;
    type Head = ResponseHead;

    fn parse_start_line(line: &str, _start_offset: u32) -> Result<ResponseHead, Error> {
        // "HTTP/1.1 200 OK" - the reason phrase is free text and may be empty
        let mut parts = line.splitn(3, ' ');
        let version = parts
            .next()
            .ok_or_else(|| parse_err(ParseReason::MalformedStartLine))?;
        let status = parts
            .next()
            .ok_or_else(|| parse_err(ParseReason::MalformedStartLine))?;

        let status_code: u16 = status
            .parse()
            .map_err(|_| parse_err(ParseReason::MalformedStartLine))?;
        if !(100..=599).contains(&status_code) {
            return Err(parse_err(ParseReason::MalformedStartLine));
        }

        Ok(ResponseHead {
            status_code,
            version: parse_version(version)?,
        })
    }

    fn body_to_eof(_head: &ResponseHead) -> bool {
        true
    }

    fn assemble(head: ResponseHead, message: HttpMessage) -> HttpResponse {
        HttpResponse::from_parsed(message, head.status_code, head.version)
    }
}

fn parse_version(token: &str) -> Result<HttpVersion, Error> {
    let digits = token
        .strip_prefix("HTTP/")
        .ok_or_else(|| parse_err(ParseReason::MalformedStartLine))?;
    let (major, minor) = digits
        .split_once('.')
        .ok_or_else(|| parse_err(ParseReason::MalformedStartLine))?;
    Ok(HttpVersion {
        major: major
            .parse()
            .map_err(|_| parse_err(ParseReason::MalformedStartLine))?,
        minor: minor
            .parse()
            .map_err(|_| parse_err(ParseReason::MalformedStartLine))?,
    })
}

/// Result of feeding bytes into the parser.
pub enum Parsed<M> {
    /// The input ended inside a message; feed the next buffer.
    NeedMore,
    /// A complete message. `leftover` holds input beyond the message end and
    ///  must seed the next parse call.
    Message { message: M, leftover: Option<Bytes> },
}

enum ChunkPhase {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailer,
}

enum State<H> {
    Header,
    FixedBody {
        head: H,
        header: BytesMut,
        fields: Vec<FieldSpan>,
        content_length: usize,
        body: BytesMut,
    },
    ChunkedBody {
        head: H,
        header: BytesMut,
        fields: Vec<FieldSpan>,
        body: BytesMut,
        phase: ChunkPhase,
    },
    BodyToEof {
        head: H,
        header: BytesMut,
        fields: Vec<FieldSpan>,
        body: BytesMut,
    },
}

/// Incremental HTTP/1.1 message parser.
///
/// Feed received buffers with [HttpParser::parse]; each call consumes the
///  accumulated input as far as possible and yields at most one message.
///  Bytes beyond the end of a produced message come back as `leftover` and
///  must be fed again before (or with) the next read. On streams where the
///  peer signals end-of-message by closing, call [HttpParser::finish].
pub struct HttpParser<K: HttpKind> {
    state: State<K::Head>,
    acc: BytesMut,
    max_body_len: usize,
}

impl<K: HttpKind> HttpParser<K> {
    pub fn new() -> HttpParser<K> {
        Self::with_max_body_len(DEFAULT_MAX_BODY_LEN)
    }

    pub fn with_max_body_len(max_body_len: usize) -> HttpParser<K> {
        HttpParser {
            state: State::Header,
            acc: BytesMut::new(),
            max_body_len,
        }
    }

    pub fn parse(&mut self, input: Bytes) -> Result<Parsed<K::Message>, Error> {
        self.acc.extend_from_slice(&input);
        self.advance()
    }

    /// Signal end of stream. Completes a read-to-close response body; any
    ///  other unfinished message is a truncation error.
    pub fn finish(&mut self) -> Result<Option<K::Message>, Error> {
        match std::mem::replace(&mut self.state, State::Header) {
            State::Header if self.acc.is_empty() => Ok(None),
            State::BodyToEof {
                head,
                header,
                fields,
                body,
            } => {
                let body = if body.is_empty() {
                    None
                } else {
                    Some(body.freeze())
                };
                let message = HttpMessage::from_parsed(header, fields, body);
                Ok(Some(K::assemble(head, message)))
            }
            _ => Err(parse_err(ParseReason::UnexpectedEof)),
        }
    }

    fn advance(&mut self) -> Result<Parsed<K::Message>, Error> {
        loop {
            match &mut self.state {
                State::Header => {
                    let Some(terminator) = find_subsequence(&self.acc, b"\r\n\r\n") else {
                        if self.acc.len() > MAX_HEADER_LEN {
                            return Err(parse_err(ParseReason::HeaderTooLarge));
                        }
                        return Ok(Parsed::NeedMore);
                    };

                    // keep the CRLF of the last field line, drop the blank line
                    let mut header = self.acc.split_to(terminator + 4);
                    header.truncate(terminator + 2);

                    let (head, fields) = parse_header_block::<K>(&header)?;
                    self.state = resolve_body_phase::<K>(head, header, fields, self.max_body_len)?;

                    // a message without a body phase completes right here
                    if let State::FixedBody {
                        content_length: 0, ..
                    } = &self.state
                    {
                        return Ok(self.produce(None));
                    }
                }

                State::FixedBody {
                    content_length,
                    body,
                    ..
                } => {
                    let needed = *content_length - body.len();
                    let take = needed.min(self.acc.len());
                    body.put_slice(&self.acc.split_to(take));
                    if body.len() < *content_length {
                        return Ok(Parsed::NeedMore);
                    }
                    let body = std::mem::take(body).freeze();
                    return Ok(self.produce(Some(body)));
                }

                State::ChunkedBody {
                    body,
                    phase,
                    ..
                } => {
                    match phase {
                        ChunkPhase::Size => {
                            let Some(line_end) = find_subsequence(&self.acc, b"\r\n") else {
                                if self.acc.len() > MAX_HEADER_LEN {
                                    return Err(parse_err(ParseReason::MalformedChunk));
                                }
                                return Ok(Parsed::NeedMore);
                            };
                            let line = self.acc.split_to(line_end + 2);
                            let size = parse_chunk_size(&line[..line_end])?;
                            if size > self.max_body_len || body.len() + size > self.max_body_len {
                                return Err(parse_err(ParseReason::BodyTooLarge));
                            }
                            *phase = if size == 0 {
                                ChunkPhase::Trailer
                            } else {
                                ChunkPhase::Data { remaining: size }
                            };
                        }
                        ChunkPhase::Data { remaining } => {
                            let take = (*remaining).min(self.acc.len());
                            body.put_slice(&self.acc.split_to(take));
                            *remaining -= take;
                            if *remaining > 0 {
                                return Ok(Parsed::NeedMore);
                            }
                            *phase = ChunkPhase::DataEnd;
                        }
                        ChunkPhase::DataEnd => {
                            if self.acc.len() < 2 {
                                return Ok(Parsed::NeedMore);
                            }
                            let crlf = self.acc.split_to(2);
                            if &crlf[..] != b"\r\n" {
                                return Err(parse_err(ParseReason::MalformedChunk));
                            }
                            *phase = ChunkPhase::Size;
                        }
                        ChunkPhase::Trailer => {
                            // trailer fields are skipped; an empty line ends the message
                            let Some(line_end) = find_subsequence(&self.acc, b"\r\n") else {
                                return Ok(Parsed::NeedMore);
                            };
                            let _ = self.acc.split_to(line_end + 2);
                            if line_end == 0 {
                                let body = std::mem::take(body).freeze();
                                return Ok(self.produce(Some(body)));
                            }
                        }
                    }
                }

                State::BodyToEof { body, .. } => {
                    if body.len() + self.acc.len() > self.max_body_len {
                        return Err(parse_err(ParseReason::BodyTooLarge));
                    }
                    body.put_slice(&self.acc.split());
                    return Ok(Parsed::NeedMore);
                }
            }
        }
    }

    fn produce(&mut self, body: Option<Bytes>) -> Parsed<K::Message> {
        let state = std::mem::replace(&mut self.state, State::Header);
        let (head, header, fields) = match state {
            State::FixedBody {
                head,
                header,
                fields,
                ..
            }
            | State::ChunkedBody {
                head,
                header,
                fields,
                ..
            } => (head, header, fields),
            State::Header | State::BodyToEof { .. } => {
                unreachable!("produce() is only called from a body phase")
            }
        };

        let body = body.filter(|b| !b.is_empty());
        let message = K::assemble(head, HttpMessage::from_parsed(header, fields, body));
        let leftover = if self.acc.is_empty() {
            None
        } else {
            Some(self.acc.split().freeze())
        };
        Parsed::Message { message, leftover }
    }
}

impl<K: HttpKind> Default for HttpParser<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Index the header block: first line through the kind hook, remaining lines
///  as name/value spans with whitespace trimmed by offset adjustment.
fn parse_header_block<K: HttpKind>(header: &[u8]) -> Result<(K::Head, Vec<FieldSpan>), Error> {
    if std::str::from_utf8(header).is_err() {
        return Err(parse_err(ParseReason::InvalidUtf8));
    }

    let mut fields = Vec::new();
    let mut head = None;
    let mut offset = 0usize;

    while offset < header.len() {
        let line_end = find_subsequence(&header[offset..], b"\r\n")
            .map(|i| offset + i)
            .expect("header block ends with CRLF by construction");
        let line = &header[offset..line_end];

        if head.is_none() {
            let line_str =
                std::str::from_utf8(line).expect("validated above for the whole block");
            head = Some(K::parse_start_line(line_str, offset as u32)?);
        } else {
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| parse_err(ParseReason::HeaderFieldWithoutColon))?;

            let name_start = offset;
            let name_end = offset + colon;

            let mut value_start = offset + colon + 1;
            let mut value_end = line_end;
            while value_start < value_end
                && matches!(header[value_start], b' ' | b'\t')
            {
                value_start += 1;
            }
            while value_end > value_start
                && matches!(header[value_end - 1], b' ' | b'\t')
            {
                value_end -= 1;
            }

            fields.push(FieldSpan {
                name: Span {
                    start: name_start as u32,
                    end: name_end as u32,
                },
                value: Span {
                    start: value_start as u32,
                    end: value_end as u32,
                },
            });
        }
        offset = line_end + 2;
    }

    let head = head.ok_or_else(|| parse_err(ParseReason::MalformedStartLine))?;
    Ok((head, fields))
}

fn resolve_body_phase<K: HttpKind>(
    head: K::Head,
    header: BytesMut,
    fields: Vec<FieldSpan>,
    max_body_len: usize,
) -> Result<State<K::Head>, Error> {
    let probe = HttpMessage::from_parsed(header, fields, None);

    let chunked = probe
        .field("Transfer-Encoding")
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);

    let content_length = {
        let mut result: Option<usize> = None;
        for value in probe.field_values("Content-Length") {
            let parsed: usize = value
                .trim()
                .parse()
                .map_err(|_| parse_err(ParseReason::InvalidContentLength))?;
            match result {
                Some(previous) if previous != parsed => {
                    return Err(parse_err(ParseReason::ConflictingContentLength))
                }
                _ => result = Some(parsed),
            }
        }
        result
    };

    let (header, fields) = probe.into_parts();

    if chunked {
        return Ok(State::ChunkedBody {
            head,
            header,
            fields,
            body: BytesMut::new(),
            phase: ChunkPhase::Size,
        });
    }

    if let Some(content_length) = content_length {
        if content_length > max_body_len {
            return Err(parse_err(ParseReason::BodyTooLarge));
        }
        return Ok(State::FixedBody {
            head,
            header,
            fields,
            content_length,
            body: BytesMut::with_capacity(content_length.min(64 * 1024)),
        });
    }

    if K::body_to_eof(&head) {
        Ok(State::BodyToEof {
            head,
            header,
            fields,
            body: BytesMut::new(),
        })
    } else {
        // requests without a length have no body
        Ok(State::FixedBody {
            head,
            header,
            fields,
            content_length: 0,
            body: BytesMut::new(),
        })
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, Error> {
    // chunk extensions after ';' are tolerated and ignored
    let digits = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let digits =
        std::str::from_utf8(digits).map_err(|_| parse_err(ParseReason::MalformedChunk))?;
    let digits = digits.trim();
    if digits.is_empty() {
        return Err(parse_err(ParseReason::MalformedChunk));
    }
    let size = u64::from_str_radix(digits, 16)
        .map_err(|_| parse_err(ParseReason::ChunkSizeOverflow))?;
    usize::try_from(size).map_err(|_| parse_err(ParseReason::ChunkSizeOverflow))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Encode a body with chunked transfer coding, splitting into chunks of at
///  most `max_chunk` bytes, terminated by the zero-length chunk.
pub fn encode_chunked(body: &[u8], max_chunk: usize) -> Bytes {
    debug_assert!(max_chunk > 0);
    let mut out = BytesMut::with_capacity(body.len() + 64);
    for chunk in body.chunks(max_chunk.max(1)) {
        out.put_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.put_slice(chunk);
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"0\r\n\r\n");
    out.freeze()
}

/// Parse an HTTP date in any of the three formats of RFC 7231: IMF-fixdate
///  (RFC 1123), RFC 850, or ANSI C asctime.
pub fn parse_http_date(input: &str) -> Result<DateTime<Utc>, Error> {
    const FORMATS: [&str; 3] = [
        "%a, %d %b %Y %H:%M:%S GMT", // Sun, 06 Nov 1994 08:49:37 GMT
        "%A, %d-%b-%y %H:%M:%S GMT", // Sunday, 06-Nov-94 08:49:37 GMT
        "%a %b %e %H:%M:%S %Y",      // Sun Nov  6 08:49:37 1994
    ];

    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(parse_err(ParseReason::MalformedStartLine))
}

pub fn format_http_date(value: DateTime<Utc>) -> String {
    value.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
