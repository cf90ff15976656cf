//! Zero-copy HTTP/1.1 request parser.
//!
//! A parsed [`Request`] borrows every field from the input buffer, so it
//! cannot outlive the next write into that buffer; the borrow checker
//! enforces the "route before compacting" order in the worker.
//!
//! Requests may be pipelined: `parse` consumes exactly one request and
//! reports how many bytes it spanned, leaving any following requests in
//! place for the next call.

use fortuna_core::{Error, Result};

/// Headers beyond this count make the request a protocol failure.
pub const MAX_HEADERS: usize = 32;

const HEAD_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: &'a str,
    pub value: &'a [u8],
}

/// One request, borrowed from the input buffer.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub method: &'a str,
    /// Target path with any query string removed.
    pub path: &'a str,
    /// Query string without the `?`, if present.
    pub query: Option<&'a str>,
    pub version: Version,
    headers: [Header<'a>; MAX_HEADERS],
    header_count: usize,
    pub body: &'a [u8],
    /// Whether the connection may carry another request after this one.
    pub keep_alive: bool,
}

impl<'a> Request<'a> {
    pub fn headers(&self) -> &[Header<'a>] {
        &self.headers[..self.header_count]
    }

    /// First header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers()
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
}

/// Parse one request from the front of `buf`.
///
/// Returns `Ok(None)` while the request is incomplete. `scanned` carries
/// how much of `buf` has already been searched for the end of the head, so
/// a request arriving in many small reads is not rescanned from the start;
/// pass `&mut 0` when there is no earlier attempt. It is reset on success.
///
/// Empty lines ahead of the request line (a stray CRLF after the previous
/// request) are skipped and counted in the consumed length.
pub fn parse<'a>(buf: &'a [u8], scanned: &mut usize) -> Result<Option<(Request<'a>, usize)>> {
    let skip = leading_empty_lines(buf);
    let mut inner = scanned.saturating_sub(skip);
    match parse_message(&buf[skip..], &mut inner)? {
        Some((req, used)) => {
            *scanned = 0;
            Ok(Some((req, skip + used)))
        }
        None => {
            *scanned = skip + inner;
            Ok(None)
        }
    }
}

fn parse_message<'a>(buf: &'a [u8], scanned: &mut usize) -> Result<Option<(Request<'a>, usize)>> {
    let from = (*scanned).min(buf.len()).saturating_sub(HEAD_END.len() - 1);
    let Some(pos) = find(&buf[from..], HEAD_END) else {
        *scanned = buf.len();
        return Ok(None);
    };
    let head_len = from + pos + HEAD_END.len();

    let mut lines = buf[..head_len - HEAD_END.len()].split(|&b| b == b'\n');
    let request_line = lines.next().map(trim_cr).unwrap_or_default();
    let (method, target, version) = parse_request_line(request_line)?;

    let (path, query) = match target.find('?') {
        Some(i) => (&target[..i], Some(&target[i + 1..])),
        None => (target, None),
    };

    let mut req = Request {
        method,
        path,
        query,
        version,
        headers: [Header::default(); MAX_HEADERS],
        header_count: 0,
        body: &[],
        keep_alive: version == Version::Http11,
    };

    let mut content_length = 0usize;
    for line in lines {
        let line = trim_cr(line);
        let header = parse_header(line)?;
        if req.header_count == MAX_HEADERS {
            return Err(Error::Protocol("too many headers"));
        }
        req.headers[req.header_count] = header;
        req.header_count += 1;

        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = parse_content_length(header.value)?;
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(Error::Protocol("transfer-encoded request bodies are not supported"));
        } else if header.name.eq_ignore_ascii_case("connection") {
            if has_token(header.value, "close") {
                req.keep_alive = false;
            } else if has_token(header.value, "keep-alive") {
                req.keep_alive = true;
            }
        }
    }

    let total = head_len
        .checked_add(content_length)
        .ok_or(Error::Protocol("content-length overflow"))?;
    if buf.len() < total {
        // Resume right at the head terminator once the body arrives.
        *scanned = head_len - 1;
        return Ok(None);
    }
    req.body = &buf[head_len..total];
    *scanned = 0;
    Ok(Some((req, total)))
}

/// [`parse`] without a resume hint.
pub fn parse_request(buf: &[u8]) -> Result<Option<(Request<'_>, usize)>> {
    parse(buf, &mut 0)
}

fn leading_empty_lines(buf: &[u8]) -> usize {
    let mut at = 0;
    loop {
        match &buf[at..] {
            [b'\r', b'\n', ..] => at += 2,
            [b'\n', ..] => at += 1,
            _ => return at,
        }
    }
}

fn parse_request_line(line: &[u8]) -> Result<(&str, &str, Version)> {
    let mut parts = line.split(|&b| b == b' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Protocol("malformed request line"));
    };

    if method.is_empty() || !method.iter().all(|&b| is_token(b)) {
        return Err(Error::Protocol("invalid method"));
    }
    if target.first() != Some(&b'/') || target.iter().any(|&b| b <= b' ' || b == 0x7f) {
        return Err(Error::Protocol("invalid request target"));
    }
    let version = match version {
        b"HTTP/1.1" => Version::Http11,
        b"HTTP/1.0" => Version::Http10,
        _ => return Err(Error::Protocol("unsupported HTTP version")),
    };

    let method = std::str::from_utf8(method).map_err(|_| Error::Protocol("invalid method"))?;
    let target =
        std::str::from_utf8(target).map_err(|_| Error::Protocol("invalid request target"))?;
    Ok((method, target, version))
}

fn parse_header(line: &[u8]) -> Result<Header<'_>> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(Error::Protocol("malformed header"))?;
    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
        return Err(Error::Protocol("invalid header name"));
    }
    let name = std::str::from_utf8(name).map_err(|_| Error::Protocol("invalid header name"))?;
    Ok(Header {
        name,
        value: trim_ows(&line[colon + 1..]),
    })
}

fn parse_content_length(value: &[u8]) -> Result<usize> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(Error::Protocol("invalid content-length"));
    }
    value.iter().try_fold(0usize, |acc, &d| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add((d - b'0') as usize))
            .ok_or(Error::Protocol("content-length overflow"))
    })
}

/// Comma-separated, case-insensitive token match (`Connection: Keep-Alive, Upgrade`).
fn has_token(value: &[u8], token: &str) -> bool {
    value
        .split(|&b| b == b',')
        .any(|t| trim_ows(t).eq_ignore_ascii_case(token.as_bytes()))
}

#[inline]
fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[inline]
fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn trim_ows(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

#[inline]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_get() {
        let buf = b"GET /plaintext HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, used) = parse_request(buf).unwrap().unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/plaintext");
        assert_eq!(req.query, None);
        assert_eq!(req.version, Version::Http11);
        assert!(req.keep_alive);
        assert_eq!(req.header("host"), Some(&b"localhost"[..]));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_fields_borrow_the_input() {
        let buf = b"GET /fortunes?x=1 HTTP/1.1\r\nHost: a\r\n\r\n";
        let (req, _) = parse_request(buf).unwrap().unwrap();
        let range = buf.as_ptr_range();
        assert!(range.contains(&req.path.as_ptr()));
        assert!(range.contains(&req.headers()[0].value.as_ptr()));
        assert_eq!(req.path, "/fortunes");
        assert_eq!(req.query, Some("x=1"));
    }

    #[test]
    fn test_incomplete_head_then_complete() {
        let full = b"GET / HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut hint = 0;
        for cut in 1..full.len() {
            hint = 0;
            assert!(parse(&full[..cut], &mut hint).unwrap().is_none(), "cut {cut}");
            assert_eq!(hint, cut);
        }
        let (_, used) = parse(full, &mut hint).unwrap().unwrap();
        assert_eq!(used, full.len());
        assert_eq!(hint, 0);
    }

    #[test]
    fn test_pipelined_requests() {
        let buf = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c";
        let (first, n1) = parse_request(buf).unwrap().unwrap();
        assert_eq!(first.path, "/a");
        let (second, n2) = parse_request(&buf[n1..]).unwrap().unwrap();
        assert_eq!(second.path, "/b");
        assert!(parse_request(&buf[n1 + n2..]).unwrap().is_none());
    }

    #[test]
    fn test_leading_empty_lines_are_skipped() {
        let buf = b"GET /a HTTP/1.1\r\n\r\n\r\n\nGET /b HTTP/1.1\r\n\r\n";
        let (first, n1) = parse_request(buf).unwrap().unwrap();
        assert_eq!(first.path, "/a");
        let (second, n2) = parse_request(&buf[n1..]).unwrap().unwrap();
        assert_eq!(second.path, "/b");
        assert_eq!(n1 + n2, buf.len());

        let mut hint = 0;
        assert!(parse(b"\r\n", &mut hint).unwrap().is_none());
        assert!(parse(b"\r\nGET / HTTP/1.1\r\n", &mut hint).unwrap().is_none());
        let (req, used) = parse(b"\r\nGET / HTTP/1.1\r\n\r\n", &mut hint).unwrap().unwrap();
        assert_eq!(req.path, "/");
        assert_eq!(used, 20);
        assert_eq!(hint, 0);
    }

    #[test]
    fn test_content_length_body_is_consumed() {
        let buf = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /y HTTP/1.1\r\n\r\n";
        let (req, used) = parse_request(buf).unwrap().unwrap();
        assert_eq!(req.body, b"hello");
        let (next, _) = parse_request(&buf[used..]).unwrap().unwrap();
        assert_eq!(next.path, "/y");

        let partial = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        assert!(parse_request(partial).unwrap().is_none());
    }

    #[test]
    fn test_body_arriving_after_head_with_hint() {
        let full = b"POST /x HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd";
        let head = full.len() - 4;
        let mut hint = 0;
        assert!(parse(&full[..head + 1], &mut hint).unwrap().is_none());
        assert!(parse(&full[..head + 3], &mut hint).unwrap().is_none());
        let (req, used) = parse(full, &mut hint).unwrap().unwrap();
        assert_eq!(req.body, b"abcd");
        assert_eq!(used, full.len());
    }

    #[test]
    fn test_keep_alive_negotiation() {
        let close = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        assert!(!parse_request(close).unwrap().unwrap().0.keep_alive);

        let http10 = b"GET / HTTP/1.0\r\n\r\n";
        assert!(!parse_request(http10).unwrap().unwrap().0.keep_alive);

        let http10_ka = b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n";
        assert!(parse_request(http10_ka).unwrap().unwrap().0.keep_alive);
    }

    #[test]
    fn test_malformed_requests() {
        let cases: &[&[u8]] = &[
            b"GET\r\n\r\n",
            b"GET / HTTP/2.0\r\n\r\n",
            b"GET nope HTTP/1.1\r\n\r\n",
            b"G(T / HTTP/1.1\r\n\r\n",
            b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n",
            b"GET / HTTP/1.1\r\nContent-Length: abc\r\n\r\n",
            b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
        ];
        for case in cases {
            let err = parse_request(case).unwrap_err();
            assert!(err.is_protocol(), "{:?}", String::from_utf8_lossy(case));
        }
    }

    #[test]
    fn test_too_many_headers() {
        let mut buf = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            buf.extend_from_slice(format!("X-{i}: v\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        assert!(matches!(parse_request(&buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_trim_ows() {
        assert_eq!(trim_ows(b"  a b \t"), b"a b");
        assert_eq!(trim_ows(b""), b"");
        assert_eq!(trim_ows(b"   "), b"");
    }
}
